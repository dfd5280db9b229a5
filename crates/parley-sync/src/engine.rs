//! The synchronization engine.
//!
//! Composes the pagination cursor, the remote service and the upsert/patch
//! engines.  Network I/O always completes before anything touches the write
//! queue: only already-fetched payloads are submitted, so remote latency
//! never blocks the writer thread.
//!
//! Ordering: all items of one page are applied in a single queue submission
//! (one transaction), and the next page is only fetched after the previous
//! page's apply has committed -- pages land in cursor order.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use parley_store::{
    ActionUpsert, Channel, Member, MemberUpsert, Message, MessageAction, MessageContent,
    MessagePatch, MessageUpsert, PageOutcome, StoreError, User, VersionMeta,
};

use crate::cache::ChatCache;
use crate::cursor::PageRequest;
use crate::error::{Result, SyncError};
use crate::queue::{EntityKind, WriteQueue};
use crate::remote::RemoteChatService;

/// Summary of a completed (or cancelled) cursor walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncRun {
    /// Pages fetched and applied.
    pub pages: usize,
    /// Entities written.
    pub applied: usize,
    /// Entities dropped for unresolved foreign references.
    pub skipped: usize,
    /// Whether the walk stopped early because of cooperative cancellation.
    pub cancelled: bool,
}

/// One synchronized page: the items as fetched, what the store did with
/// them, and the request for the page after it (`None` at the end of the
/// collection).
#[derive(Debug, Clone)]
pub struct SyncedPage<T> {
    pub items: Vec<T>,
    pub outcome: PageOutcome,
    pub next: Option<PageRequest>,
}

/// Sync facade over a remote service and one cache instance.
pub struct SyncEngine<R> {
    remote: Arc<R>,
    queue: WriteQueue,
    page_size: usize,
}

impl<R: RemoteChatService> SyncEngine<R> {
    pub fn new(cache: &ChatCache, remote: Arc<R>) -> Self {
        Self {
            remote,
            queue: cache.queue().clone(),
            page_size: cache.config().page_size,
        }
    }

    /// A first-page request at the configured page size.
    pub fn first_page(&self) -> PageRequest {
        PageRequest::first(self.page_size)
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Fetch one channel and upsert it into the cache.
    pub async fn sync_channel(&self, id: &str) -> Result<Channel> {
        let fetched = self.remote.fetch_channel(id).await.map_err(SyncError::remote)?;
        let stored = self
            .queue
            .run(move |batch| {
                let stored = batch.db().upsert_channel(&fetched)?;
                batch.mark(EntityKind::Channel, &stored.id);
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    /// Fetch and apply one page of channels.
    pub async fn sync_channels_page(&self, request: &PageRequest) -> Result<SyncedPage<Channel>> {
        let page = self
            .remote
            .fetch_channels(request)
            .await
            .map_err(|e| SyncError::remote_page(request.clone(), e))?;

        let items = page.items;
        let to_apply = items.clone();
        let outcome = self
            .queue
            .run(move |batch| {
                let outcome = batch.db().apply_channels_page(&to_apply)?;
                for id in &outcome.applied {
                    batch.mark(EntityKind::Channel, id.clone());
                }
                Ok(outcome)
            })
            .await?;

        Ok(SyncedPage { items, outcome, next: request.advance(page.next.as_deref()) })
    }

    /// Walk the channel collection to exhaustion.
    pub async fn sync_all_channels(
        &self,
        request: PageRequest,
        cancel: &CancellationToken,
        on_page: impl FnMut(&SyncedPage<Channel>),
    ) -> Result<SyncRun> {
        self.drive_walk(request, cancel, |req| async move {
            self.sync_channels_page(&req).await
        }, on_page)
        .await
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Fetch one user and upsert it into the cache.
    pub async fn sync_user(&self, id: &str) -> Result<User> {
        let fetched = self.remote.fetch_user(id).await.map_err(SyncError::remote)?;
        let stored = self
            .queue
            .run(move |batch| {
                let stored = batch.db().upsert_user(&fetched)?;
                batch.mark(EntityKind::User, &stored.id);
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    /// Fetch and apply one page of users.
    pub async fn sync_users_page(&self, request: &PageRequest) -> Result<SyncedPage<User>> {
        let page = self
            .remote
            .fetch_users(request)
            .await
            .map_err(|e| SyncError::remote_page(request.clone(), e))?;

        let items = page.items;
        let to_apply = items.clone();
        let outcome = self
            .queue
            .run(move |batch| {
                let outcome = batch.db().apply_users_page(&to_apply)?;
                for id in &outcome.applied {
                    batch.mark(EntityKind::User, id.clone());
                }
                Ok(outcome)
            })
            .await?;

        Ok(SyncedPage { items, outcome, next: request.advance(page.next.as_deref()) })
    }

    /// Walk the user collection to exhaustion.
    pub async fn sync_all_users(
        &self,
        request: PageRequest,
        cancel: &CancellationToken,
        on_page: impl FnMut(&SyncedPage<User>),
    ) -> Result<SyncRun> {
        self.drive_walk(request, cancel, |req| async move {
            self.sync_users_page(&req).await
        }, on_page)
        .await
    }

    // ------------------------------------------------------------------
    // Members
    // ------------------------------------------------------------------

    /// Fetch one membership and upsert it into the cache.
    pub async fn sync_member(&self, channel_id: &str, user_id: &str) -> Result<Member> {
        let fetched = self
            .remote
            .fetch_member(channel_id, user_id)
            .await
            .map_err(SyncError::remote)?;
        let stored = self
            .queue
            .run(move |batch| {
                let stored = batch.db().upsert_member(&fetched)?;
                batch.mark(EntityKind::Member, stored.composite_id());
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    /// Fetch and apply one page of a channel's members.
    pub async fn sync_members_page(
        &self,
        channel_id: &str,
        request: &PageRequest,
    ) -> Result<SyncedPage<MemberUpsert>> {
        let page = self
            .remote
            .fetch_members(channel_id, request)
            .await
            .map_err(|e| SyncError::remote_page(request.clone(), e))?;

        let items = page.items;
        let to_apply = items.clone();
        let outcome = self
            .queue
            .run(move |batch| {
                let outcome = batch.db().apply_members_page(&to_apply)?;
                for id in &outcome.applied {
                    batch.mark(EntityKind::Member, id.clone());
                }
                Ok(outcome)
            })
            .await?;

        Ok(SyncedPage { items, outcome, next: request.advance(page.next.as_deref()) })
    }

    /// Walk a channel's membership to exhaustion.
    pub async fn sync_all_members(
        &self,
        channel_id: &str,
        request: PageRequest,
        cancel: &CancellationToken,
        on_page: impl FnMut(&SyncedPage<MemberUpsert>),
    ) -> Result<SyncRun> {
        self.drive_walk(request, cancel, |req| async move {
            self.sync_members_page(channel_id, &req).await
        }, on_page)
        .await
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Fetch one message and upsert it into the cache.
    pub async fn sync_message(&self, id: &str) -> Result<Message> {
        let fetched = self.remote.fetch_message(id).await.map_err(SyncError::remote)?;
        let stored = self
            .queue
            .run(move |batch| {
                let stored = batch.db().upsert_message(&fetched)?;
                batch.mark(EntityKind::Message, &stored.id);
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    /// Fetch and apply one page of a channel's message history.
    pub async fn sync_messages_page(
        &self,
        channel_id: &str,
        request: &PageRequest,
    ) -> Result<SyncedPage<MessageUpsert>> {
        let page = self
            .remote
            .fetch_messages(channel_id, request)
            .await
            .map_err(|e| SyncError::remote_page(request.clone(), e))?;

        let items = page.items;
        let to_apply = items.clone();
        let outcome = self
            .queue
            .run(move |batch| {
                let outcome = batch.db().apply_messages_page(&to_apply)?;
                for id in &outcome.applied {
                    batch.mark(EntityKind::Message, id.clone());
                }
                Ok(outcome)
            })
            .await?;

        Ok(SyncedPage { items, outcome, next: request.advance(page.next.as_deref()) })
    }

    /// Walk a channel's message history to exhaustion.
    pub async fn sync_all_messages(
        &self,
        channel_id: &str,
        request: PageRequest,
        cancel: &CancellationToken,
        on_page: impl FnMut(&SyncedPage<MessageUpsert>),
    ) -> Result<SyncRun> {
        self.drive_walk(request, cancel, |req| async move {
            self.sync_messages_page(channel_id, &req).await
        }, on_page)
        .await
    }

    // ------------------------------------------------------------------
    // Message actions
    // ------------------------------------------------------------------

    /// Fetch and apply one page of a channel's message actions.
    pub async fn sync_actions_page(
        &self,
        channel_id: &str,
        request: &PageRequest,
    ) -> Result<SyncedPage<ActionUpsert>> {
        let page = self
            .remote
            .fetch_actions(channel_id, request)
            .await
            .map_err(|e| SyncError::remote_page(request.clone(), e))?;

        let items = page.items;
        let to_apply = items.clone();
        let outcome = self
            .queue
            .run(move |batch| {
                let outcome = batch.db().apply_actions_page(&to_apply)?;
                for id in &outcome.applied {
                    batch.mark(EntityKind::MessageAction, id.clone());
                }
                Ok(outcome)
            })
            .await?;

        Ok(SyncedPage { items, outcome, next: request.advance(page.next.as_deref()) })
    }

    /// Walk a channel's message actions to exhaustion.
    pub async fn sync_all_actions(
        &self,
        channel_id: &str,
        request: PageRequest,
        cancel: &CancellationToken,
        on_page: impl FnMut(&SyncedPage<ActionUpsert>),
    ) -> Result<SyncRun> {
        self.drive_walk(request, cancel, |req| async move {
            self.sync_actions_page(channel_id, &req).await
        }, on_page)
        .await
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Compose and send a message.
    ///
    /// The message is written locally first with a client-assigned id and
    /// timetoken `0` (the channel and author must already be cached); once
    /// the remote acknowledges, the server-assigned timetoken and version
    /// are patched in.  The id never changes across this sequence.
    pub async fn send_message(
        &self,
        channel_id: &str,
        author_user_id: &str,
        content: MessageContent,
        custom: Option<serde_json::Value>,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            timetoken: 0,
            created_at: Utc::now(),
            content,
            custom,
            author_user_id: author_user_id.to_string(),
            channel_id: channel_id.to_string(),
            version: VersionMeta::default(),
        };
        self.resend_message(message).await
    }

    /// Send (or re-send) an already composed message.  Keyed on the
    /// content-level id, so driving this twice for the same message is
    /// idempotent on both sides.
    pub async fn resend_message(&self, message: Message) -> Result<Message> {
        let optimistic = message.clone();
        self.queue
            .run(move |batch| {
                let up = MessageUpsert { message: optimistic, channel: None, author: None };
                let stored = batch.db().upsert_message(&up)?;
                batch.mark(EntityKind::Message, &stored.id);
                Ok(stored)
            })
            .await?;

        let receipt = self.remote.send_message(&message).await.map_err(SyncError::remote)?;

        let patch = MessagePatch {
            id: message.id.clone(),
            version: receipt.version,
            timetoken: Some(receipt.timetoken),
            content: None,
            custom: None,
        };
        let stored = self
            .queue
            .run(move |batch| {
                let stored = batch.db().patch_message_record(&patch)?;
                batch.mark(EntityKind::Message, &stored.id);
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    /// Deliver an ephemeral signal (typing indicator and the like); nothing
    /// is cached.
    pub async fn send_signal(&self, channel_id: &str, payload: serde_json::Value) -> Result<()> {
        self.remote
            .send_signal(channel_id, payload)
            .await
            .map_err(SyncError::remote)
    }

    // ------------------------------------------------------------------
    // Remote-write passthroughs: remote first, then fold the result into
    // the cache.
    // ------------------------------------------------------------------

    /// Create a channel remotely and cache the result.
    pub async fn create_channel(&self, channel: &Channel) -> Result<Channel> {
        let created = self.remote.create_channel(channel).await.map_err(SyncError::remote)?;
        let stored = self
            .queue
            .run(move |batch| {
                let stored = batch.db().upsert_channel(&created)?;
                batch.mark(EntityKind::Channel, &stored.id);
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    /// Update a channel remotely and cache the result.
    pub async fn update_channel(&self, channel: &Channel) -> Result<Channel> {
        let updated = self.remote.update_channel(channel).await.map_err(SyncError::remote)?;
        let stored = self
            .queue
            .run(move |batch| {
                let stored = batch.db().upsert_channel(&updated)?;
                batch.mark(EntityKind::Channel, &stored.id);
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    /// Remove a channel remotely, then locally.  Returns whether a local
    /// row was removed; removing an uncached channel is a no-op.
    pub async fn remove_channel(&self, id: &str) -> Result<bool> {
        self.remote.remove_channel(id).await.map_err(SyncError::remote)?;
        let id = id.to_string();
        let removed = self
            .queue
            .run(move |batch| {
                let removed = batch.db().delete_channel(&id)?;
                if removed {
                    batch.mark(EntityKind::Channel, &id);
                }
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    /// Create a user remotely and cache the result.
    pub async fn create_user(&self, user: &User) -> Result<User> {
        let created = self.remote.create_user(user).await.map_err(SyncError::remote)?;
        let stored = self
            .queue
            .run(move |batch| {
                let stored = batch.db().upsert_user(&created)?;
                batch.mark(EntityKind::User, &stored.id);
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    /// Update a user remotely and cache the result.
    pub async fn update_user(&self, user: &User) -> Result<User> {
        let updated = self.remote.update_user(user).await.map_err(SyncError::remote)?;
        let stored = self
            .queue
            .run(move |batch| {
                let stored = batch.db().upsert_user(&updated)?;
                batch.mark(EntityKind::User, &stored.id);
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    /// Remove a user remotely, then locally.
    pub async fn remove_user(&self, id: &str) -> Result<bool> {
        self.remote.remove_user(id).await.map_err(SyncError::remote)?;
        let id = id.to_string();
        let removed = self
            .queue
            .run(move |batch| {
                let removed = batch.db().delete_user(&id)?;
                if removed {
                    batch.mark(EntityKind::User, &id);
                }
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    /// Remove a message remotely, then locally.
    pub async fn remove_message(&self, id: &str) -> Result<bool> {
        self.remote.remove_message(id).await.map_err(SyncError::remote)?;
        let id = id.to_string();
        let removed = self
            .queue
            .run(move |batch| {
                let removed = batch.db().delete_message(&id)?;
                if removed {
                    batch.mark(EntityKind::Message, &id);
                }
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    /// Attach an action to a message remotely and cache the acknowledged
    /// action.  The parent message must already be cached.
    pub async fn add_action(&self, action: &MessageAction) -> Result<MessageAction> {
        let acked = self.remote.add_action(action).await.map_err(SyncError::remote)?;
        let stored = self
            .queue
            .run(move |batch| {
                let up = ActionUpsert { action: acked, parent: None, user: None };
                let stored = batch.db().upsert_action(&up)?;
                batch.mark(EntityKind::MessageAction, stored.derived_id());
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    /// Remove an action remotely, then locally.
    pub async fn remove_action(
        &self,
        user_id: &str,
        parent_timetoken: i64,
        action_timetoken: i64,
    ) -> Result<bool> {
        self.remote
            .remove_action(user_id, parent_timetoken, action_timetoken)
            .await
            .map_err(SyncError::remote)?;
        let user_id = user_id.to_string();
        let removed = self
            .queue
            .run(move |batch| {
                let removed =
                    batch.db().delete_action(&user_id, parent_timetoken, action_timetoken)?;
                if removed {
                    let id = parley_store::derive_action_id(
                        &user_id,
                        parent_timetoken,
                        action_timetoken,
                    );
                    batch.mark(EntityKind::MessageAction, id);
                }
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // The walk loop shared by every collection.
    // ------------------------------------------------------------------

    /// Drive a page function to exhaustion in cursor order.
    ///
    /// Fail-fast: the first page-level error terminates the walk (later
    /// pages are unreachable without the failed page's cursor).  Item-level
    /// unresolved references are tolerated after the first page; on the
    /// first page they abort the walk, since nothing downstream can be
    /// trusted when the opening page is already inconsistent.
    ///
    /// Cancellation is checked between pages only: a page already fetched is
    /// still applied, cancellation merely prevents requesting the next one.
    async fn drive_walk<T, F, Fut>(
        &self,
        request: PageRequest,
        cancel: &CancellationToken,
        mut fetch_page: F,
        mut on_page: impl FnMut(&SyncedPage<T>),
    ) -> Result<SyncRun>
    where
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = Result<SyncedPage<T>>>,
    {
        let mut run = SyncRun::default();
        let mut request = Some(request);

        while let Some(current) = request.take() {
            if cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }

            let page = fetch_page(current).await?;

            if run.pages == 0 && page.outcome.skipped > 0 {
                return Err(SyncError::Store(StoreError::MissingRequiredData(format!(
                    "{} unresolved items on the first page",
                    page.outcome.skipped
                ))));
            }

            run.pages += 1;
            run.applied += page.outcome.applied.len();
            run.skipped += page.outcome.skipped;
            on_page(&page);
            request = page.next.clone();
        }

        tracing::debug!(
            pages = run.pages,
            applied = run.applied,
            skipped = run.skipped,
            cancelled = run.cancelled,
            "cursor walk finished"
        );
        Ok(run)
    }
}
