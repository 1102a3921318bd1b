use dlcache::cache::{CacheKey, CacheStore, SetOptions};
use dlcache::checksum::{self, Algorithm};
use dlcache::config::Config;
use proptest::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Bytes that can never spell an HTML or error-page marker.
fn safe_content() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(b"abcdfghjkmnpqstuvwxyz".to_vec()), 1..2048)
}

fn store(dir: &TempDir) -> CacheStore {
    CacheStore::new(&dir.path().join("cache"), &Config::default())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_set_get_round_trip(content in safe_content(), name in "[a-z]{1,12}") {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.bin");
        fs::write(&src, &content).unwrap();
        let url = format!("https://x/{}.bin", name);

        let store = store(&dir);
        prop_assert!(store.set(&url, &src, &SetOptions::default()));
        let path = store.get(&url, true).unwrap();
        prop_assert_eq!(fs::read(path).unwrap(), content);
    }

    #[test]
    fn test_any_flipped_byte_is_a_miss(content in safe_content(), index in any::<prop::sample::Index>()) {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.bin");
        fs::write(&src, &content).unwrap();
        let url = "https://x/flip.bin";

        let store = store(&dir);
        prop_assert!(store.set(url, &src, &SetOptions::default()));
        let entry = store.entry_for(url);
        let mut stored = fs::read(&entry.data_path).unwrap();
        let i = index.index(stored.len());
        stored[i] ^= 0x01;
        fs::write(&entry.data_path, &stored).unwrap();

        prop_assert!(store.get(url, true).is_none());
        prop_assert!(!entry.data_path.exists());
        prop_assert!(!entry.meta_path.exists());
    }

    #[test]
    fn test_digest_then_verify(content in prop::collection::vec(any::<u8>(), 0..4096)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, &content).unwrap();

        let digests = checksum::digest(&path, &Algorithm::ALL).unwrap();
        for algorithm in Algorithm::ALL {
            let hex = digests.get(algorithm).unwrap();
            prop_assert_eq!(hex.len(), algorithm.hex_len());
            prop_assert_eq!(hex, checksum::digest_bytes(algorithm, &content));
        }
        prop_assert!(checksum::verify(&path, &digests.into_names()).unwrap());
    }

    #[test]
    fn test_cache_key_shape(url in "\\PC*") {
        let key = CacheKey::from_url(&url);
        prop_assert_eq!(key.as_str().len(), 32);
        prop_assert_eq!(CacheKey::parse(key.as_str()), Some(key.clone()));
        prop_assert_eq!(CacheKey::from_url(&url), key);
    }
}
