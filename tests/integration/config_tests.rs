use dlcache::checksum::Algorithm;
use dlcache::config::{CleanupStrategy, Config, ConfigError};
use dlcache::validate::FileKind;
use figment::providers::Serialized;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from other tests
    let figment = figment::Figment::from(Serialized::defaults(Config::default()));
    let config: Config = figment.extract().unwrap();
    assert_eq!(config, Config::default());
    assert!(config.file_types.is_empty());
    assert!(!config.auto_cleanup);
}

#[test]
fn test_config_load_from_env() {
    std::env::set_var("DLCACHE_ITEST_TTL_SECS", "120");
    // Use double underscore for nesting
    std::env::set_var("DLCACHE_ITEST_INTEGRITY__VERIFY_ON_HIT", "false");
    std::env::set_var("DLCACHE_ITEST_CLEANUP__STRATEGY", "age");

    use figment::{providers::Env, Figment};
    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Env::prefixed("DLCACHE_ITEST_").split("__"));

    let config: Config = figment.extract().unwrap();

    assert_eq!(config.ttl_secs, 120);
    assert!(!config.integrity.verify_on_hit);
    assert!(config.integrity.verify_on_set);
    assert_eq!(config.cleanup.strategy, CleanupStrategy::Age);

    std::env::remove_var("DLCACHE_ITEST_TTL_SECS");
    std::env::remove_var("DLCACHE_ITEST_INTEGRITY__VERIFY_ON_HIT");
    std::env::remove_var("DLCACHE_ITEST_CLEANUP__STRATEGY");
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");

    let toml_content = r#"
cache_dir = "/srv/cache"
ttl_secs = 3600
max_size = 1048576
file_lock = false

[integrity]
algorithms = ["sha256", "crc32"]

[cleanup]
strategy = "size"
keep_recent = 3

[file_types.gzip]
min_size = 1024
min_decompressed_size = 4096
"#;
    fs::write(&config_path, toml_content).unwrap();

    let config = Config::load(Some(&config_path)).unwrap();

    assert_eq!(config.cache_dir, Some(PathBuf::from("/srv/cache")));
    assert_eq!(config.ttl_secs, 3600);
    assert_eq!(config.max_size, 1_048_576);
    assert!(!config.file_lock);
    assert!(config.enabled);
    assert_eq!(
        config.integrity.algorithms,
        vec![Algorithm::Sha256, Algorithm::Crc32]
    );
    assert_eq!(config.cleanup.strategy, CleanupStrategy::Size);
    assert_eq!(config.cleanup.keep_recent, 3);

    let gzip = &config.file_types[&FileKind::Gzip];
    assert_eq!(gzip.min_size, Some(1024));
    assert_eq!(gzip.min_decompressed_size, Some(4096));
    assert_eq!(gzip.max_size, None);
    assert_eq!(config.algorithms_for(FileKind::Zip), config.integrity.algorithms);
}

#[test]
fn test_config_missing_file_uses_defaults() {
    let temp_dir = tempdir().unwrap();
    let config = Config::load(Some(&temp_dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config.ttl_secs, Config::default().ttl_secs);
}

#[test]
fn test_config_malformed_file_is_error() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "ttl_secs = \"soon\"\n").unwrap();

    assert!(matches!(
        Config::load(Some(&config_path)),
        Err(ConfigError::Load(_))
    ));
}

#[test]
fn test_config_inconsistent_file_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        "auto_cleanup = true\ncleanup_interval_secs = 0\n",
    )
    .unwrap();

    let err = Config::load(Some(&config_path)).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("cleanup_interval_secs"));
}

#[test]
fn test_config_save_and_reload() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("nested/dir/config.toml");

    let mut config = Config::default();
    config.ttl_secs = 99;
    config.cleanup.keep_recent = 2;
    config.save(&config_path).unwrap();

    let loaded = Config::load(Some(&config_path)).unwrap();
    assert_eq!(loaded, config);
}
