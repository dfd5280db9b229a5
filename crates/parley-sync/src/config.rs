//! Cache configuration.
//!
//! All settings have sensible defaults so a cache can open with zero
//! configuration; tests and embedders override what they need.

use std::path::PathBuf;

use parley_store::DEFAULT_CHUNK_SIZE;

/// Configuration for a [`ChatCache`](crate::ChatCache) instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Explicit database file path.
    /// Default: `None` (the platform data directory is used).
    pub db_path: Option<PathBuf>,

    /// Number of entities committed per transaction by the chunked batch
    /// upsert surface.
    /// Default: `256`.
    pub chunk_size: usize,

    /// Page size requested from the remote during cursor walks.
    /// Default: `100`.
    pub page_size: usize,

    /// Capacity of the change-notification broadcast channel.  Slow
    /// subscribers that fall further behind than this observe a lag error,
    /// not a blocked writer.
    /// Default: `256`.
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            page_size: 100,
            event_capacity: 256,
        }
    }
}
