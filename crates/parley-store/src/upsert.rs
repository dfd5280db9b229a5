//! The upsert engine: idempotent insert-or-full-replace keyed by natural
//! identity.
//!
//! Upsert is a *replace*, distinct from the patch engine's *merge*: a full
//! remote object always wins outright.  An entity is never inserted with a
//! dangling foreign reference -- every peer the incoming entity mentions is
//! either embedded in full (and recursively upserted first), already cached,
//! or the upsert fails with [`StoreError::MissingRequiredData`] leaving the
//! store unchanged.

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Channel, Member, Message, MessageAction, User};

/// Default number of entities committed per batch transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// A [`Member`] together with optionally embedded peer objects.
#[derive(Debug, Clone)]
pub struct MemberUpsert {
    pub member: Member,
    pub channel: Option<Channel>,
    pub user: Option<User>,
}

/// A [`Message`] together with optionally embedded peer objects, supplied at
/// write time to avoid a second round trip.
#[derive(Debug, Clone)]
pub struct MessageUpsert {
    pub message: Message,
    pub channel: Option<Channel>,
    pub author: Option<User>,
}

/// A [`MessageAction`] together with optionally embedded peer objects.
#[derive(Debug, Clone)]
pub struct ActionUpsert {
    pub action: MessageAction,
    pub parent: Option<Box<MessageUpsert>>,
    pub user: Option<User>,
}

/// Result of applying one page of remote items in a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageOutcome {
    /// Natural ids of the items written, in application order.
    pub applied: Vec<String>,
    /// Items dropped because a foreign reference could not be resolved.
    pub skipped: usize,
}

impl Database {
    // ------------------------------------------------------------------
    // Single-entity upserts (each in its own transaction)
    // ------------------------------------------------------------------

    /// Insert or fully replace a channel, keyed by id.
    pub fn upsert_channel(&self, channel: &Channel) -> Result<Channel> {
        let tx = self.conn().unchecked_transaction()?;
        let stored = self.upsert_channel_in_tx(channel)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Insert or fully replace a user, keyed by id.
    pub fn upsert_user(&self, user: &User) -> Result<User> {
        let tx = self.conn().unchecked_transaction()?;
        let stored = self.upsert_user_in_tx(user)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Insert or fully replace a member, keyed by `(channel_id, user_id)`.
    pub fn upsert_member(&self, up: &MemberUpsert) -> Result<Member> {
        let tx = self.conn().unchecked_transaction()?;
        let stored = self.upsert_member_in_tx(up)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Insert or fully replace a message, keyed by its content-level id.
    pub fn upsert_message(&self, up: &MessageUpsert) -> Result<Message> {
        let tx = self.conn().unchecked_transaction()?;
        let stored = self.upsert_message_in_tx(up)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Insert or fully replace a message action, keyed by its derived id.
    pub fn upsert_action(&self, up: &ActionUpsert) -> Result<MessageAction> {
        let tx = self.conn().unchecked_transaction()?;
        let stored = self.upsert_action_in_tx(up)?;
        tx.commit()?;
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Page application: all items of one page in ONE transaction, so a
    // reader never observes a half-applied page.
    // ------------------------------------------------------------------

    /// Apply one page of channels as a single transaction.
    pub fn apply_channels_page(&self, items: &[Channel]) -> Result<PageOutcome> {
        self.apply_page_with(items, |db, ch| db.upsert_channel_in_tx(ch).map(|c| c.id))
    }

    /// Apply one page of users as a single transaction.
    pub fn apply_users_page(&self, items: &[User]) -> Result<PageOutcome> {
        self.apply_page_with(items, |db, u| db.upsert_user_in_tx(u).map(|u| u.id))
    }

    /// Apply one page of members as a single transaction.
    pub fn apply_members_page(&self, items: &[MemberUpsert]) -> Result<PageOutcome> {
        self.apply_page_with(items, |db, m| db.upsert_member_in_tx(m).map(|m| m.composite_id()))
    }

    /// Apply one page of messages as a single transaction.
    pub fn apply_messages_page(&self, items: &[MessageUpsert]) -> Result<PageOutcome> {
        self.apply_page_with(items, |db, m| db.upsert_message_in_tx(m).map(|m| m.id))
    }

    /// Apply one page of message actions as a single transaction.
    pub fn apply_actions_page(&self, items: &[ActionUpsert]) -> Result<PageOutcome> {
        self.apply_page_with(items, |db, a| db.upsert_action_in_tx(a).map(|a| a.derived_id()))
    }

    /// Items that fail to resolve a foreign reference are skipped (the
    /// peer-resolution check precedes any write, so a skipped item leaves no
    /// partial state); any other failure rolls the whole page back.
    fn apply_page_with<T>(
        &self,
        items: &[T],
        apply: impl Fn(&Database, &T) -> Result<String>,
    ) -> Result<PageOutcome> {
        let tx = self.conn().unchecked_transaction()?;
        let mut outcome = PageOutcome::default();

        for item in items {
            match apply(self, item) {
                Ok(id) => outcome.applied.push(id),
                Err(StoreError::MissingRequiredData(what)) => {
                    tracing::warn!(missing = %what, "skipping page item with dangling reference");
                    outcome.skipped += 1;
                }
                Err(other) => return Err(other),
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Chunked batching: fixed-size chunks, one transaction each, fail-open.
    // A failed chunk is reported through the callback and never aborts the
    // chunks after it -- each chunk is independently idempotent and
    // re-driveable.
    // ------------------------------------------------------------------

    /// Upsert a uniform list of channels in chunked transactions.
    /// Returns the number of entities written.
    pub fn upsert_channels_batch(
        &self,
        items: &[Channel],
        chunk_size: usize,
        on_chunk: impl FnMut(&[Channel], Option<&StoreError>),
    ) -> usize {
        self.upsert_batch_with(items, chunk_size, |db, ch| {
            db.upsert_channel_in_tx(ch).map(|_| ())
        }, on_chunk)
    }

    /// Upsert a uniform list of users in chunked transactions.
    pub fn upsert_users_batch(
        &self,
        items: &[User],
        chunk_size: usize,
        on_chunk: impl FnMut(&[User], Option<&StoreError>),
    ) -> usize {
        self.upsert_batch_with(items, chunk_size, |db, u| {
            db.upsert_user_in_tx(u).map(|_| ())
        }, on_chunk)
    }

    /// Upsert a uniform list of members in chunked transactions.
    pub fn upsert_members_batch(
        &self,
        items: &[MemberUpsert],
        chunk_size: usize,
        on_chunk: impl FnMut(&[MemberUpsert], Option<&StoreError>),
    ) -> usize {
        self.upsert_batch_with(items, chunk_size, |db, m| {
            db.upsert_member_in_tx(m).map(|_| ())
        }, on_chunk)
    }

    /// Upsert a uniform list of messages in chunked transactions.
    pub fn upsert_messages_batch(
        &self,
        items: &[MessageUpsert],
        chunk_size: usize,
        on_chunk: impl FnMut(&[MessageUpsert], Option<&StoreError>),
    ) -> usize {
        self.upsert_batch_with(items, chunk_size, |db, m| {
            db.upsert_message_in_tx(m).map(|_| ())
        }, on_chunk)
    }

    /// Upsert a uniform list of message actions in chunked transactions.
    pub fn upsert_actions_batch(
        &self,
        items: &[ActionUpsert],
        chunk_size: usize,
        on_chunk: impl FnMut(&[ActionUpsert], Option<&StoreError>),
    ) -> usize {
        self.upsert_batch_with(items, chunk_size, |db, a| {
            db.upsert_action_in_tx(a).map(|_| ())
        }, on_chunk)
    }

    fn upsert_batch_with<T>(
        &self,
        items: &[T],
        chunk_size: usize,
        apply: impl Fn(&Database, &T) -> Result<()>,
        mut on_chunk: impl FnMut(&[T], Option<&StoreError>),
    ) -> usize {
        let chunk_size = chunk_size.max(1);
        let mut applied = 0;

        for chunk in items.chunks(chunk_size) {
            let result = (|| -> Result<()> {
                let tx = self.conn().unchecked_transaction()?;
                for item in chunk {
                    apply(self, item)?;
                }
                tx.commit()?;
                Ok(())
            })();

            match result {
                Ok(()) => {
                    applied += chunk.len();
                    on_chunk(chunk, None);
                }
                Err(e) => {
                    tracing::warn!(error = %e, chunk_len = chunk.len(), "batch chunk failed");
                    on_chunk(chunk, Some(&e));
                }
            }
        }

        applied
    }

    // ------------------------------------------------------------------
    // Per-entity algorithms.  The `_in_tx` variants assume the caller holds
    // an open transaction; every foreign-reference check precedes the first
    // write so a failed item leaves no partial state.
    // ------------------------------------------------------------------

    pub(crate) fn upsert_channel_in_tx(&self, channel: &Channel) -> Result<Channel> {
        if channel.id.is_empty() {
            return Err(StoreError::MissingRequiredData("channel id".into()));
        }
        if self.channel_exists(&channel.id)? {
            self.replace_channel_row(channel)?;
        } else {
            self.insert_channel_row(channel)?;
        }
        self.get_channel(&channel.id)
    }

    pub(crate) fn upsert_user_in_tx(&self, user: &User) -> Result<User> {
        if user.id.is_empty() {
            return Err(StoreError::MissingRequiredData("user id".into()));
        }
        if self.user_exists(&user.id)? {
            self.replace_user_row(user)?;
        } else {
            self.insert_user_row(user)?;
        }
        self.get_user(&user.id)
    }

    pub(crate) fn upsert_member_in_tx(&self, up: &MemberUpsert) -> Result<Member> {
        let member = &up.member;
        if member.channel_id.is_empty() || member.user_id.is_empty() {
            return Err(StoreError::MissingRequiredData("member composite id".into()));
        }

        // Replace path: the composite key already exists.
        if self.member_exists(&member.channel_id, &member.user_id)? {
            self.replace_member_row(member)?;
            return self.get_member(&member.channel_id, &member.user_id);
        }

        // Insert path: resolve both foreign references before the first
        // write, so a failed item leaves the store unchanged.  An embedded
        // peer must be the one the reference names; a bare reference must
        // already be cached.
        self.resolve_channel_ref(up.channel.as_ref(), &member.channel_id, || {
            format!("member {}", member.composite_id())
        })?;
        self.resolve_user_ref(up.user.as_ref(), &member.user_id, || {
            format!("member {}", member.composite_id())
        })?;

        if let Some(channel) = &up.channel {
            self.upsert_channel_in_tx(channel)?;
        }
        if let Some(user) = &up.user {
            self.upsert_user_in_tx(user)?;
        }

        self.insert_member_row(member)?;
        self.conn().execute(
            "UPDATE channels SET member_count = member_count + 1 WHERE id = ?1",
            [&member.channel_id],
        )?;

        self.get_member(&member.channel_id, &member.user_id)
    }

    pub(crate) fn upsert_message_in_tx(&self, up: &MessageUpsert) -> Result<Message> {
        let message = &up.message;
        if message.id.is_empty() {
            return Err(StoreError::MissingRequiredData("message id".into()));
        }

        if self.message_exists(&message.id)? {
            self.replace_message_row(message)?;
            return self.get_message(&message.id);
        }

        self.resolve_channel_ref(up.channel.as_ref(), &message.channel_id, || {
            format!("message {}", message.id)
        })?;
        self.resolve_user_ref(up.author.as_ref(), &message.author_user_id, || {
            format!("message {}", message.id)
        })?;

        if let Some(channel) = &up.channel {
            self.upsert_channel_in_tx(channel)?;
        }
        if let Some(author) = &up.author {
            self.upsert_user_in_tx(author)?;
        }

        self.insert_message_row(message)?;
        self.conn().execute(
            "UPDATE channels SET message_count = message_count + 1 WHERE id = ?1",
            [&message.channel_id],
        )?;

        self.get_message(&message.id)
    }

    pub(crate) fn upsert_action_in_tx(&self, up: &ActionUpsert) -> Result<MessageAction> {
        let action = &up.action;
        if action.user_id.is_empty() || action.channel_id.is_empty() || action.parent_timetoken == 0
        {
            return Err(StoreError::MissingRequiredData("action identity".into()));
        }

        let derived = action.derived_id();
        if self.action_row_exists(&derived)? {
            self.replace_action_row(action)?;
            return self.get_action(
                &action.user_id,
                action.parent_timetoken,
                action.action_timetoken,
            );
        }

        // The parent message resolves by (channel, timetoken).  An embedded
        // parent must sit at exactly that address; a bare reference must
        // already be cached.  As above, every check precedes the first write.
        match &up.parent {
            Some(parent)
                if parent.message.channel_id == action.channel_id
                    && parent.message.timetoken == action.parent_timetoken => {}
            Some(_) => {
                return Err(StoreError::MissingRequiredData(format!(
                    "embedded parent does not match action {derived}"
                )))
            }
            None => {
                if self
                    .find_message_by_timetoken(&action.channel_id, action.parent_timetoken)?
                    .is_none()
                {
                    return Err(StoreError::MissingRequiredData(format!(
                        "message timetoken {} in channel {} for action {derived}",
                        action.parent_timetoken, action.channel_id
                    )));
                }
            }
        }
        self.resolve_user_ref(up.user.as_ref(), &action.user_id, || {
            format!("action {derived}")
        })?;

        if let Some(parent) = &up.parent {
            self.upsert_message_in_tx(parent)?;
        }
        if let Some(user) = &up.user {
            self.upsert_user_in_tx(user)?;
        }

        let parent_id = self
            .find_message_by_timetoken(&action.channel_id, action.parent_timetoken)?
            .map(|m| m.id)
            .ok_or_else(|| {
                StoreError::MissingRequiredData(format!(
                    "message timetoken {} in channel {} for action {derived}",
                    action.parent_timetoken, action.channel_id
                ))
            })?;

        self.insert_action_row(action, &parent_id)?;
        self.get_action(
            &action.user_id,
            action.parent_timetoken,
            action.action_timetoken,
        )
    }

    /// Check that a channel reference can be satisfied: an embedded peer
    /// must carry the referenced id, a bare reference must already exist.
    fn resolve_channel_ref(
        &self,
        embedded: Option<&Channel>,
        channel_id: &str,
        owner: impl Fn() -> String,
    ) -> Result<()> {
        match embedded {
            Some(channel) if channel.id == channel_id => Ok(()),
            Some(channel) => Err(StoreError::MissingRequiredData(format!(
                "embedded channel {} does not match {}",
                channel.id,
                owner()
            ))),
            None if self.channel_exists(channel_id)? => Ok(()),
            None => Err(StoreError::MissingRequiredData(format!(
                "channel {channel_id} for {}",
                owner()
            ))),
        }
    }

    /// Check that a user reference can be satisfied, as above.
    fn resolve_user_ref(
        &self,
        embedded: Option<&User>,
        user_id: &str,
        owner: impl Fn() -> String,
    ) -> Result<()> {
        match embedded {
            Some(user) if user.id == user_id => Ok(()),
            Some(user) => Err(StoreError::MissingRequiredData(format!(
                "embedded user {} does not match {}",
                user.id,
                owner()
            ))),
            None if self.user_exists(user_id)? => Ok(()),
            None => Err(StoreError::MissingRequiredData(format!(
                "user {user_id} for {}",
                owner()
            ))),
        }
    }
}
