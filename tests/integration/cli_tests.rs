use clap::Parser;
use dlcache::cli::Cli;
use dlcache::error::ExitCode;
use dlcache::run_app;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

/// Run `dlcache` against an isolated cache root and config file.
fn run(dir: &TempDir, args: &[&str]) -> anyhow::Result<ExitCode> {
    let cache_dir = dir.path().join("cache");
    let config = dir.path().join("config.toml");
    let mut argv = vec![
        "dlcache".to_string(),
        "--no-color".to_string(),
        "--cache-dir".to_string(),
        cache_dir.display().to_string(),
        "--config".to_string(),
        config.display().to_string(),
    ];
    argv.extend(args.iter().map(|a| a.to_string()));
    run_app(Cli::try_parse_from(argv).unwrap())
}

fn write(dir: &Path, name: &str, content: &[u8]) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path.display().to_string()
}

#[test]
fn test_set_then_get() {
    let dir = tempdir().unwrap();
    let file = write(dir.path(), "tool.bin", b"tool bytes");
    let url = "https://example.com/tool.bin";

    assert_eq!(run(&dir, &["get", url]).unwrap(), ExitCode::NotFound);
    assert_eq!(run(&dir, &["set", url, &file]).unwrap(), ExitCode::Success);
    assert_eq!(run(&dir, &["get", url]).unwrap(), ExitCode::Success);
    assert_eq!(
        run(&dir, &["get", url, "--namespace", "versions"]).unwrap(),
        ExitCode::NotFound
    );
    assert!(dir.path().join("cache/downloads").is_dir());
}

#[test]
fn test_set_with_checksum() {
    let dir = tempdir().unwrap();
    let file = write(dir.path(), "a.bin", b"abc");
    let url = "https://example.com/a.bin";
    let sha256 = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    let good = format!("sha256={}", sha256);
    assert_eq!(
        run(&dir, &["set", url, &file, "--checksum", &good]).unwrap(),
        ExitCode::Success
    );

    let bad = format!("sha256={}", "0".repeat(64));
    assert!(run(&dir, &["set", url, &file, "--checksum", &bad]).is_err());
}

#[test]
fn test_set_missing_source_maps_to_not_found() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.tgz").display().to_string();
    let err = run(&dir, &["set", "https://example.com/missing.tgz", &missing]).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::NotFound);
}

#[test]
fn test_set_rejects_error_page() {
    let dir = tempdir().unwrap();
    let file = write(dir.path(), "page.bin", b"<html><body>404 Not Found</body></html>");
    let err = run(&dir, &["set", "https://example.com/page.bin", &file]).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    assert!(format!("{:#}", err).contains("error page"));
}

#[test]
fn test_delete_clear_and_reports() {
    let dir = tempdir().unwrap();
    let file = write(dir.path(), "x.bin", b"payload");
    let url = "https://example.com/x.bin";
    run(&dir, &["set", url, &file]).unwrap();

    for args in [
        vec!["stats"],
        vec!["stats", "--output", "json"],
        vec!["sweep", "--namespace", "downloads"],
        vec!["prune", "--max-size", "1MB", "--strategy", "size"],
        vec!["cleanup", "--output", "json"],
    ] {
        assert_eq!(run(&dir, &args).unwrap(), ExitCode::Success, "{:?}", args);
    }
    assert!(dir.path().join("cache/.last_cleanup").is_file());
    assert_eq!(run(&dir, &["get", url]).unwrap(), ExitCode::Success);

    assert_eq!(run(&dir, &["delete", url]).unwrap(), ExitCode::Success);
    assert_eq!(run(&dir, &["get", url]).unwrap(), ExitCode::NotFound);

    run(&dir, &["set", url, &file]).unwrap();
    assert_eq!(run(&dir, &["clear"]).unwrap(), ExitCode::Success);
    assert_eq!(run(&dir, &["get", url]).unwrap(), ExitCode::NotFound);
}

#[test]
fn test_validate_and_digest() {
    let dir = tempdir().unwrap();
    let good = write(dir.path(), "ok.bin", b"plain");
    let bad = write(dir.path(), "bad.gz", b"not gzip");

    assert_eq!(run(&dir, &["validate", &good]).unwrap(), ExitCode::Success);
    assert_eq!(
        run(&dir, &["validate", &good, &bad]).unwrap(),
        ExitCode::GeneralError
    );
    assert_eq!(
        run(&dir, &["validate", &good, "--kind", "zip"]).unwrap(),
        ExitCode::GeneralError
    );
    assert_eq!(
        run(&dir, &["digest", &good, "-a", "md5", "-a", "crc32"]).unwrap(),
        ExitCode::Success
    );
}

#[test]
fn test_scan_command() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("broken.zip"), b"nope").unwrap();
    let root_arg = root.display().to_string();

    assert_eq!(
        run(&dir, &["scan", &root_arg, "--dry-run"]).unwrap(),
        ExitCode::Success
    );
    assert!(root.join("broken.zip").exists());

    assert_eq!(
        run(&dir, &["scan", &root_arg, "--output", "json"]).unwrap(),
        ExitCode::Success
    );
    assert!(!root.join("broken.zip").exists());

    let missing = dir.path().join("missing").display().to_string();
    let err = run(&dir, &["scan", &missing]).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::NotFound);
}

#[test]
fn test_config_init_show_and_path() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");

    assert_eq!(run(&dir, &["config", "path"]).unwrap(), ExitCode::Success);
    assert_eq!(run(&dir, &["config", "init"]).unwrap(), ExitCode::Success);
    assert!(config.is_file());

    assert!(run(&dir, &["config", "init"]).is_err());
    assert_eq!(
        run(&dir, &["config", "init", "--force"]).unwrap(),
        ExitCode::Success
    );
    assert_eq!(run(&dir, &["config", "show"]).unwrap(), ExitCode::Success);
}

#[test]
fn test_bad_config_file_is_an_error() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("config.toml"), "max_size = [1, 2]\n").unwrap();
    let err = run(&dir, &["stats"]).unwrap_err();
    assert!(format!("{:#}", err).contains("failed to load configuration"));
}

#[test]
fn test_invalid_arguments_are_rejected() {
    assert!(Cli::try_parse_from(["dlcache", "get"]).is_err());
    assert!(Cli::try_parse_from(["dlcache", "validate"]).is_err());
    assert!(Cli::try_parse_from([
        "dlcache", "set", "https://x/a", "a", "--checksum", "sha256=zz"
    ])
    .is_err());
    assert!(Cli::try_parse_from(["dlcache", "-q", "-v", "stats"]).is_err());
}
