use dlcache::cache::{CacheStore, SetOptions};
use dlcache::config::Config;
use dlcache::scan::{ScanError, Scanner};
use dlcache::validate::Validator;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn scanner() -> Scanner {
    Scanner::new(Validator::new(BTreeMap::new()))
}

fn write(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn test_scan_mixed_data_tree() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "sources/php-8.3.0.tar.gz", &gzip(b"source tree"));
    write(root, "sources/php-8.2.0.tar.gz", b"<!DOCTYPE html><title>404</title>");
    write(root, "ext/redis.zip", b"PK\x03\x04rest");
    write(root, "ext/broken.zip", b"XX\x03\x04rest");
    write(root, "bin/composer.phar", b"#!/usr/bin/env php\n");
    write(root, "downloads/x.bin", b"Access Denied");
    write(root, "install.lock", b"");
    write(root, "cache/.gitkeep", b"");

    let report = scanner().scan(root).unwrap();
    assert_eq!(report.checked, 6);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.deleted, 3);
    assert!(!report.has_failures());

    let deleted: Vec<PathBuf> = report.deleted_files.iter().map(|d| d.path.clone()).collect();
    for rel in ["sources/php-8.2.0.tar.gz", "ext/broken.zip", "downloads/x.bin"] {
        assert!(deleted.contains(&PathBuf::from(rel)), "{} not reported", rel);
        assert!(!root.join(rel).exists(), "{} not deleted", rel);
    }
    assert!(root.join("sources/php-8.3.0.tar.gz").exists());
    assert!(root.join("install.lock").exists());

    let expected: u64 = report.deleted_files.iter().map(|d| d.size).sum();
    assert_eq!(report.bytes_freed, expected);
}

#[test]
fn test_scan_leaves_healthy_cache_alone() {
    let dir = tempdir().unwrap();
    let cache = dir.path().join("cache/downloads");
    let store = CacheStore::new(&cache, &Config::default());
    let archive = write(dir.path(), "incoming/a.tgz", &gzip(b"payload"));
    let phar = write(
        dir.path(),
        "incoming/composer.phar",
        b"#!/usr/bin/env php\n<?php error_reporting(0); __HALT_COMPILER();",
    );
    let plain = write(dir.path(), "incoming/b.bin", b"plain payload");
    assert!(store.set("https://x/a.tgz", &archive, &SetOptions::default()));
    assert!(store.set("https://x/composer.phar", &phar, &SetOptions::default()));
    assert!(store.set("https://x/b.bin", &plain, &SetOptions::default()));

    let report = scanner().scan(&dir.path().join("cache")).unwrap();
    assert_eq!(report.checked, 6);
    assert_eq!(report.deleted, 0, "{:?}", report.deleted_files);
    for url in ["https://x/a.tgz", "https://x/composer.phar", "https://x/b.bin"] {
        assert!(store.get(url, true).is_some(), "{} lost", url);
    }
}

#[test]
fn test_scan_judges_cache_artifacts_by_recorded_kind() {
    let dir = tempdir().unwrap();
    let store = CacheStore::new(&dir.path().join("cache/downloads"), &Config::default());
    let archive = write(dir.path(), "incoming/a.tgz", &gzip(b"payload"));
    assert!(store.set("https://x/a.tgz", &archive, &SetOptions::default()));
    let entry = store.entry_for("https://x/a.tgz");
    fs::write(&entry.data_path, b"plain text, no gzip header").unwrap();

    let report = scanner().scan(&dir.path().join("cache")).unwrap();
    assert_eq!(report.deleted, 1);
    assert!(report.deleted_files[0].reason.contains("gzip"));
    assert!(!entry.data_path.exists());
}

#[test]
fn test_scan_is_idempotent() {
    let dir = tempdir().unwrap();
    write(dir.path(), "a/bad.gz", b"nope");
    assert_eq!(scanner().scan(dir.path()).unwrap().deleted, 1);

    let second = scanner().scan(dir.path()).unwrap();
    assert_eq!(second.deleted, 0);
    assert_eq!(second.checked, 0);
}

#[test]
fn test_scan_dry_run_reports_without_deleting() {
    let dir = tempdir().unwrap();
    let bad = write(dir.path(), "bad.tar", b"definitely not a tar archive");

    let report = scanner().dry_run(true).scan(dir.path()).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.bytes_freed, 28);
    assert!(bad.exists());
}

#[test]
fn test_scan_missing_root() {
    let dir = tempdir().unwrap();
    let err = scanner().scan(&dir.path().join("missing")).unwrap_err();
    assert!(matches!(err, ScanError::NotFound(_)));
}

#[cfg(unix)]
#[test]
fn test_scan_does_not_follow_symlinks() {
    let dir = tempdir().unwrap();
    let outside = tempdir().unwrap();
    write(outside.path(), "victim.bin", b"404 Not Found");
    std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

    let report = scanner().scan(dir.path()).unwrap();
    assert_eq!(report.checked, 0);
    assert!(outside.path().join("victim.bin").exists());
}
