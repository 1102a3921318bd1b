use dlcache::cache::{CacheStore, SetOptions};
use dlcache::checksum::{digest_bytes, Algorithm};
use dlcache::clock::ManualClock;
use dlcache::config::Config;
use dlcache::logging::{CacheOp, MemoryLogger};
use dlcache::validate::{FileKind, KindRules};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const TTL: u64 = 3600;
const T0: u64 = 1_700_000_000;

struct Harness {
    dir: TempDir,
    store: CacheStore,
    logger: Arc<MemoryLogger>,
    clock: ManualClock,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(Config {
            ttl_secs: TTL,
            ..Default::default()
        })
    }

    fn with_config(config: Config) -> Self {
        let dir = tempdir().unwrap();
        let logger = Arc::new(MemoryLogger::new());
        let clock = ManualClock::new(T0);
        let store = CacheStore::new(&dir.path().join("downloads"), &config)
            .with_logger(logger.clone())
            .with_clock(Arc::new(clock.clone()));
        Self {
            dir,
            store,
            logger,
            clock,
        }
    }

    fn source(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn store_files(&self) -> usize {
        match fs::read_dir(self.store.dir()) {
            Ok(rd) => rd
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .count(),
            Err(_) => 0,
        }
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn assert_evicted(store: &CacheStore, url: &str) {
    let entry = store.entry_for(url);
    assert!(!entry.data_path.exists(), "data artifact survived");
    assert!(!entry.meta_path.exists(), "metadata record survived");
}

#[test]
fn test_round_trip_is_byte_identical() {
    let h = Harness::new();
    let content = b"\x7fELF binary payload \x00\x01\x02";
    let src = h.source("tool.bin", content);
    let url = "https://mirror.example.com/tools/tool.bin";

    assert!(h.store.set(url, &src, &SetOptions::default()));
    let path = h.store.get(url, true).unwrap();
    assert_eq!(fs::read(path).unwrap(), content);
    assert_eq!(h.logger.details(CacheOp::Hit), vec![url.to_string()]);
}

#[test]
fn test_miss_before_set() {
    let h = Harness::new();
    assert!(h.store.get("https://never.example.com/x.tgz", true).is_none());
    assert_eq!(
        h.logger.details(CacheOp::Miss),
        vec!["file not found".to_string()]
    );
}

#[test]
fn test_ttl_boundary() {
    let h = Harness::new();
    let src = h.source("a.bin", b"abc");
    let url = "https://x/a.bin";
    assert!(h.store.set(url, &src, &SetOptions::default()));

    h.clock.advance(TTL);
    assert!(h.store.get(url, true).is_some());

    h.clock.advance(1);
    assert!(h.store.get(url, true).is_none());
    assert_evicted(&h.store, url);
    assert_eq!(h.logger.details(CacheOp::Miss), vec!["expired".to_string()]);
}

#[test]
fn test_truncated_artifact_is_evicted() {
    let h = Harness::new();
    let src = h.source("a.bin", b"0123456789");
    let url = "https://x/a.bin";
    assert!(h.store.set(url, &src, &SetOptions::default()));

    let data = h.store.entry_for(url).data_path;
    fs::write(&data, b"01234").unwrap();

    assert!(h.store.get(url, true).is_none());
    assert_evicted(&h.store, url);
    assert_eq!(
        h.logger.details(CacheOp::Miss),
        vec!["size mismatch".to_string()]
    );
}

#[test]
fn test_flipped_byte_is_evicted() {
    let h = Harness::new();
    let src = h.source("a.bin", b"0123456789");
    let url = "https://x/a.bin";
    assert!(h.store.set(url, &src, &SetOptions::default()));

    let data = h.store.entry_for(url).data_path;
    let mut bytes = fs::read(&data).unwrap();
    bytes[4] ^= 0x01;
    fs::write(&data, bytes).unwrap();

    assert!(h.store.get(url, true).is_none());
    assert_evicted(&h.store, url);
}

#[test]
fn test_unverified_get_skips_integrity_checks() {
    let h = Harness::new();
    let src = h.source("a.bin", b"0123456789");
    let url = "https://x/a.bin";
    assert!(h.store.set(url, &src, &SetOptions::default()));
    fs::write(h.store.entry_for(url).data_path, b"01234").unwrap();

    assert!(h.store.get(url, false).is_some());
    assert!(h.store.get(url, true).is_none());
}

#[test]
fn test_reject_zero_byte_file() {
    let h = Harness::new();
    let src = h.source("empty.bin", b"");
    assert!(!h.store.set("https://x/empty.bin", &src, &SetOptions::default()));
    assert_eq!(h.store_files(), 0);
    assert_eq!(h.store.stats().count, 0);
}

#[test]
fn test_reject_gzip_without_magic() {
    let h = Harness::new();
    let src = h.source("src.tgz", b"<html>Service Unavailable</html>");
    assert!(!h
        .store
        .set("https://x/php-8.3.0.tar.gz", &src, &SetOptions::default()));
    assert_eq!(h.store_files(), 0);
}

#[test]
fn test_reject_leaves_existing_entry_untouched() {
    let h = Harness::new();
    let url = "https://x/a.bin";
    let good = h.source("good.bin", b"good");
    assert!(h.store.set(url, &good, &SetOptions::default()));

    let bad = h.source("bad.bin", b"");
    assert!(!h.store.set(url, &bad, &SetOptions::default()));
    let path = h.store.get(url, true).unwrap();
    assert_eq!(fs::read(path).unwrap(), b"good");
}

#[test]
fn test_checksum_authority() {
    let h = Harness::new();
    let content = b"release tarball contents";
    let src = h.source("a.bin", content);
    let url = "https://x/a.bin";
    let mut checksums = BTreeMap::new();
    checksums.insert(
        "sha256".to_string(),
        digest_bytes(Algorithm::Sha256, content),
    );
    assert!(h
        .store
        .set(url, &src, &SetOptions::with_checksums(checksums.clone())));
    assert_eq!(
        h.store.entry_for(url).metadata().unwrap().checksums,
        checksums
    );

    let data = h.store.entry_for(url).data_path;
    let mut bytes = fs::read(&data).unwrap();
    bytes[0] = b'R';
    fs::write(&data, &bytes).unwrap();
    assert_eq!(bytes.len(), content.len());

    assert!(h.store.get(url, true).is_none());
    assert_eq!(
        h.logger.details(CacheOp::Miss),
        vec!["checksum mismatch".to_string()]
    );
}

#[test]
fn test_wrong_supplied_checksum_is_refused() {
    let h = Harness::new();
    let src = h.source("a.bin", b"content");
    let mut checksums = BTreeMap::new();
    checksums.insert("crc32".to_string(), "00000000".to_string());
    assert!(!h
        .store
        .set("https://x/a.bin", &src, &SetOptions::with_checksums(checksums)));
    assert_eq!(h.store_files(), 0);
}

#[test]
fn test_gzip_url_is_validated_as_gzip() {
    let mut config = Config {
        ttl_secs: TTL,
        ..Default::default()
    };
    config.file_types.insert(
        FileKind::Gzip,
        KindRules {
            min_decompressed_size: Some(1000),
            ..Default::default()
        },
    );
    let h = Harness::with_config(config);
    let url = "https://www.php.net/distributions/php-8.3.0.tar.gz";

    let placeholder = h.source("small.tgz", &gzip(b"tiny"));
    assert!(!h.store.set(url, &placeholder, &SetOptions::default()));

    let real = h.source("real.tgz", &gzip(&[b'x'; 4096]));
    assert!(h.store.set(url, &real, &SetOptions::default()));

    let entry = h.store.entry_for(url);
    assert!(entry.data_path.extension().unwrap() == "data");
    assert!(h.store.get(url, true).is_some());
}

#[test]
fn test_second_set_replaces_entry() {
    let h = Harness::new();
    let url = "https://x/a.bin";
    assert!(h.store.set(url, &h.source("1.bin", b"first"), &SetOptions::default()));
    h.clock.advance(10);
    assert!(h
        .store
        .set(url, &h.source("2.bin", b"second!"), &SetOptions::default()));

    let meta = h.store.entry_for(url).metadata().unwrap();
    assert_eq!(meta.time, T0 + 10);
    assert_eq!(meta.size, 7);
    assert_eq!(fs::read(h.store.get(url, true).unwrap()).unwrap(), b"second!");
    assert_eq!(h.store.stats().count, 1);
}

#[test]
fn test_delete_and_clear() {
    let h = Harness::new();
    let a = "https://x/a.bin";
    let b = "https://x/b.bin";
    assert!(h.store.set(a, &h.source("a.bin", b"aaa"), &SetOptions::default()));
    assert!(h.store.set(b, &h.source("b.bin", b"bbb"), &SetOptions::default()));

    assert!(h.store.delete(a));
    assert!(h.store.delete(a));
    assert_evicted(&h.store, a);
    assert_eq!(h.store.stats().count, 1);

    assert!(h.store.clear());
    assert_eq!(h.store.stats().count, 0);
    assert_eq!(h.logger.details(CacheOp::Clear).len(), 1);
}

#[test]
fn test_disabled_cache_never_admits() {
    let h = Harness::with_config(Config {
        enabled: false,
        ..Default::default()
    });
    let src = h.source("a.bin", b"abc");
    assert!(!h.store.set("https://x/a.bin", &src, &SetOptions::default()));
    assert!(h.store.get("https://x/a.bin", true).is_none());
    assert_eq!(h.store_files(), 0);
}

#[test]
fn test_original_path_is_recorded() {
    let h = Harness::new();
    let src = h.source("download.tmp", b"abc");
    assert!(h.store.set("https://x/a", &src, &SetOptions::default()));
    let meta = h.store.entry_for("https://x/a").metadata().unwrap();
    assert_eq!(Path::new(&meta.original_path), src.as_path());
    assert_eq!(meta.cache_version, "1.0");
}
