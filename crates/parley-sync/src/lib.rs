//! # parley-sync
//!
//! Incremental synchronization of a local chat replica against a remote,
//! paginated, eventually-consistent store.
//!
//! The crate composes four pieces around [`parley_store`]:
//! [`cursor`] (opaque-token pagination with a no-progress guard),
//! [`queue`] (the single serialized write context per cache instance),
//! [`cache`] (the [`ChatCache`] instance: store lifecycle, readers, change
//! subscriptions, patch application) and [`engine`] (the
//! [`SyncEngine`] facade: `sync_one` / `sync_page` / `sync_all` per entity
//! kind plus the send path).  The remote itself stays behind the
//! [`remote::RemoteChatService`] boundary trait.

pub mod cache;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod queue;
pub mod remote;

mod error;

pub use cache::ChatCache;
pub use config::CacheConfig;
pub use cursor::{Page, PageRequest};
pub use engine::{SyncEngine, SyncRun, SyncedPage};
pub use error::{Result, SyncError};
pub use queue::{ChangeEvent, EntityKind, WriteBatch, WriteQueue};
pub use remote::{MessageReceipt, RemoteChatService, RemoteError};
