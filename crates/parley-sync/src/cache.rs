//! The cache instance: one write queue, any number of readers.

use std::path::PathBuf;

use tokio::sync::broadcast;

use parley_store::{
    ChannelPatch, Database, MemberPatch, MessagePatch, StoreError, UserPatch,
};

use crate::config::CacheConfig;
use crate::queue::{ChangeEvent, EntityKind, WriteQueue};

/// A local, queryable replica of remote chat state.
///
/// Opening a cache runs schema migrations first -- a store whose migration
/// failed never opens -- then hands the write connection to the dedicated
/// writer thread.  All mutation goes through [`ChatCache::queue`]; reads go
/// through independent read-only connections from [`ChatCache::reader`],
/// which observe committed writes but are never blocked by sync traffic.
pub struct ChatCache {
    path: PathBuf,
    queue: WriteQueue,
    config: CacheConfig,
}

impl ChatCache {
    /// Open (or create) the cache described by `config`.
    pub fn open(config: CacheConfig) -> Result<Self, StoreError> {
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::open_default()?,
        };
        let path = db.path().ok_or(StoreError::NoDataDir)?;

        tracing::info!(path = %path.display(), "chat cache opened");

        let queue = WriteQueue::spawn(db, config.event_capacity)?;
        Ok(Self { path, queue, config })
    }

    /// The serialized write context for this cache instance.
    pub fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    /// Open an independent read-only database handle.
    ///
    /// Readers may hold long-lived handles and query concurrently with the
    /// write queue; WAL isolation keeps them consistent.
    pub fn reader(&self) -> Result<Database, StoreError> {
        Database::open_read_at(&self.path)
    }

    /// Subscribe to committed-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.queue.subscribe()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Patch application.  Patches originate from remote change
    // notifications; staleness is handled inside the store (a stale patch
    // returns the unchanged row and publishes no event).
    // ------------------------------------------------------------------

    /// Apply a channel patch through the write queue.
    pub async fn apply_channel_patch(
        &self,
        patch: ChannelPatch,
    ) -> Result<parley_store::Channel, StoreError> {
        self.queue
            .run(move |batch| {
                let before = batch.db().get_channel(&patch.id)?;
                let after = batch.db().patch_channel_record(&patch)?;
                if after.version != before.version {
                    batch.mark(EntityKind::Channel, &after.id);
                }
                Ok(after)
            })
            .await
    }

    /// Apply a user patch through the write queue.
    pub async fn apply_user_patch(
        &self,
        patch: UserPatch,
    ) -> Result<parley_store::User, StoreError> {
        self.queue
            .run(move |batch| {
                let before = batch.db().get_user(&patch.id)?;
                let after = batch.db().patch_user_record(&patch)?;
                if after.version != before.version {
                    batch.mark(EntityKind::User, &after.id);
                }
                Ok(after)
            })
            .await
    }

    /// Apply a member patch through the write queue.
    pub async fn apply_member_patch(
        &self,
        patch: MemberPatch,
    ) -> Result<parley_store::Member, StoreError> {
        self.queue
            .run(move |batch| {
                let before = batch.db().get_member(&patch.channel_id, &patch.user_id)?;
                let after = batch.db().patch_member_record(&patch)?;
                if after.version != before.version {
                    batch.mark(EntityKind::Member, after.composite_id());
                }
                Ok(after)
            })
            .await
    }

    /// Apply a message patch through the write queue.
    pub async fn apply_message_patch(
        &self,
        patch: MessagePatch,
    ) -> Result<parley_store::Message, StoreError> {
        self.queue
            .run(move |batch| {
                let before = batch.db().get_message(&patch.id)?;
                let after = batch.db().patch_message_record(&patch)?;
                if after.version != before.version {
                    batch.mark(EntityKind::Message, &after.id);
                }
                Ok(after)
            })
            .await
    }
}
