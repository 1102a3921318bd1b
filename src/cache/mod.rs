//! Download cache with integrity verification.
//!
//! # Architecture
//!
//! * [`key`]: URL-derived lookup keys.
//! * [`entry`]: the on-disk entry (data artifact + JSON metadata record).
//! * [`store`]: one namespace directory with get/set/delete/clear/stats.
//! * [`manager`]: the cache root, one store per [`Namespace`], and scheduled cleanup.
//! * [`lock`]: optional advisory lock taken around admissions.
//!
//! # Layout
//!
//! ```text
//! <cache root>/
//!   .last_cleanup
//!   versions/
//!   extensions/
//!   downloads/
//!     5d41402abc4b2a76b9719d911017c592.data
//!     5d41402abc4b2a76b9719d911017c592.json
//!     .locks/
//! ```

pub mod entry;
pub mod key;
pub mod lock;
pub mod manager;
pub mod store;

pub use entry::{CacheEntry, CacheMetadata, MetadataError, CACHE_VERSION};
pub use key::CacheKey;
pub use manager::{CacheManager, CleanupReport, Namespace, CLEANUP_STAMP};
pub use store::{CacheError, CacheStore, MissReason, SetOptions, StoreStats};
