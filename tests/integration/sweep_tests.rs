use dlcache::cache::{CacheManager, Namespace, SetOptions};
use dlcache::clock::ManualClock;
use dlcache::config::{CleanupStrategy, Config};
use dlcache::logging::MemoryLogger;
use dlcache::sweep::{SweepStats, Sweeper};
use filetime::FileTime;
use std::fs;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn manager(config: Config) -> (TempDir, CacheManager, ManualClock) {
    let dir = tempdir().unwrap();
    let clock = ManualClock::new(2_000_000);
    let config = Config {
        cache_dir: Some(dir.path().join("cache")),
        ..config
    };
    let manager = CacheManager::new(&config)
        .with_logger(Arc::new(MemoryLogger::new()))
        .with_clock(Arc::new(clock.clone()));
    (dir, manager, clock)
}

fn admit(dir: &TempDir, manager: &CacheManager, url: &str, content: &[u8]) {
    let src = dir.path().join("incoming");
    fs::write(&src, content).unwrap();
    assert!(manager
        .store(Namespace::Downloads)
        .set(url, &src, &SetOptions::default()));
}

#[test]
fn test_sweep_empty_cache_is_all_zero() {
    let (_dir, manager, _) = manager(Config::default());
    for stats in manager.sweep_all().values() {
        assert_eq!(*stats, SweepStats::default());
    }
}

#[test]
fn test_second_sweep_removes_nothing() {
    let (dir, manager, clock) = manager(Config {
        ttl_secs: 60,
        ..Default::default()
    });
    admit(&dir, &manager, "https://x/1.bin", b"one");
    admit(&dir, &manager, "https://x/2.bin", b"two");
    clock.advance(30);
    admit(&dir, &manager, "https://x/3.bin", b"three");
    let store = manager.store(Namespace::Downloads);
    fs::write(store.entry_for("https://x/3.bin").meta_path, b"{\"url\": 5}").unwrap();
    clock.advance(31);

    let first = manager.sweep_all()[&Namespace::Downloads];
    assert_eq!(first.checked, 3);
    assert_eq!(first.expired_removed, 2);
    assert_eq!(first.corrupted_removed, 1);
    assert_eq!(first.bytes_freed, 3 + 3 + 5);

    let second = manager.sweep_all()[&Namespace::Downloads];
    assert_eq!(second.removed(), 0);
    assert_eq!(second.checked, 0);
}

#[test]
fn test_sweep_heals_half_evicted_entries() {
    let (dir, manager, _) = manager(Config::default());
    admit(&dir, &manager, "https://x/a.bin", b"aaaa");
    admit(&dir, &manager, "https://x/b.bin", b"bbbb");
    let store = manager.store(Namespace::Downloads);
    fs::remove_file(store.entry_for("https://x/a.bin").data_path).unwrap();
    fs::remove_file(store.entry_for("https://x/b.bin").meta_path).unwrap();

    assert!(store.get("https://x/a.bin", true).is_none());

    let stats = Sweeper::new(store).sweep();
    assert_eq!(stats.corrupted_removed, 1);
    assert_eq!(stats.bytes_freed, 4);
    assert!(store.entries().unwrap().is_empty());
    assert!(store.orphans().unwrap().is_empty());
}

#[test]
fn test_prune_lru_evicts_least_recently_accessed() {
    let (dir, manager, clock) = manager(Config::default());
    admit(&dir, &manager, "https://x/stale.bin", b"1111");
    clock.advance(1);
    admit(&dir, &manager, "https://x/hot.bin", b"2222");

    let store = manager.store(Namespace::Downloads);
    let stale = store.entry_for("https://x/stale.bin");
    filetime::set_file_atime(&stale.data_path, FileTime::from_unix_time(1_000, 0)).unwrap();

    let stats = Sweeper::new(store).prune_with(4, CleanupStrategy::Lru, 0);
    assert_eq!(stats.removed, 1);
    assert!(!stale.is_present());
    assert!(store.get("https://x/hot.bin", true).is_some());
}

#[test]
fn test_prune_uses_configured_strategy() {
    let mut config = Config::default();
    config.cleanup.strategy = CleanupStrategy::Size;
    let (dir, manager, _) = manager(config);
    admit(&dir, &manager, "https://x/big.bin", &[b'b'; 64]);
    admit(&dir, &manager, "https://x/small.bin", b"s");

    let store = manager.store(Namespace::Downloads);
    let stats = Sweeper::new(store).prune(10);
    assert_eq!(stats.bytes_freed, 64);
    assert!(store.get("https://x/small.bin", true).is_some());
}
