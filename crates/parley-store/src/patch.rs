//! The patch engine: sparse, version-gated field merges.
//!
//! A patch carries its own version metadata plus only the fields it wants to
//! change.  The merge functions are pure -- persistence is the caller's
//! responsibility -- and stale patches are silently dropped, never errors:
//! out-of-order delivery is expected under concurrent notification streams.

use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    Channel, Member, Message, MessageContent, OptionalChange, User, VersionMeta,
};

// ---------------------------------------------------------------------------
// Patch types
// ---------------------------------------------------------------------------

/// Sparse change-set for a [`Channel`].  `None` means "field not mentioned".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelPatch {
    pub id: String,
    pub version: VersionMeta,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub details: Option<String>,
    pub avatar_url: Option<String>,
    pub custom: Option<serde_json::Value>,
}

/// Sparse change-set for a [`User`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    pub id: String,
    pub version: VersionMeta,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub external_id: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub custom: Option<serde_json::Value>,
}

/// Sparse change-set for a [`Member`].
///
/// `presence_state` is tri-state: a payload that omits it leaves the cached
/// state alone, a payload that clears it removes it.  `is_present` is a
/// regular merge field -- it is never inferred when the payload omits it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberPatch {
    pub channel_id: String,
    pub user_id: String,
    pub version: VersionMeta,
    pub status: Option<String>,
    pub custom: Option<serde_json::Value>,
    pub is_present: Option<bool>,
    #[serde(default)]
    pub presence_state: OptionalChange<serde_json::Value>,
}

/// Sparse change-set for a [`Message`].  Used in particular to fold the
/// server-assigned timetoken into an optimistically composed message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePatch {
    pub id: String,
    pub version: VersionMeta,
    pub timetoken: Option<i64>,
    pub content: Option<MessageContent>,
    pub custom: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Pure merges
// ---------------------------------------------------------------------------

/// Merge a channel patch into an already-fetched row.
///
/// Returns `existing` unchanged when the staleness gate rejects the patch.
/// Once any field is merged, `etag`/`updated_at` are overwritten with the
/// patch's values even if no visible field changed, so later patches compare
/// against the newest version token.
pub fn merge_channel(existing: &Channel, patch: &ChannelPatch) -> Channel {
    if !patch.version.supersedes(&existing.version) {
        tracing::debug!(id = %existing.id, "dropping stale channel patch");
        return existing.clone();
    }

    let mut merged = existing.clone();
    if let Some(name) = &patch.name {
        merged.name = Some(name.clone());
    }
    if let Some(kind) = &patch.kind {
        merged.kind = kind.clone();
    }
    if let Some(status) = &patch.status {
        merged.status = Some(status.clone());
    }
    if let Some(details) = &patch.details {
        merged.details = Some(details.clone());
    }
    if let Some(avatar_url) = &patch.avatar_url {
        merged.avatar_url = Some(avatar_url.clone());
    }
    if let Some(custom) = &patch.custom {
        merged.custom = Some(custom.clone());
    }
    merged.version = patch.version.clone();
    merged
}

/// Merge a user patch into an already-fetched row.
pub fn merge_user(existing: &User, patch: &UserPatch) -> User {
    if !patch.version.supersedes(&existing.version) {
        tracing::debug!(id = %existing.id, "dropping stale user patch");
        return existing.clone();
    }

    let mut merged = existing.clone();
    if let Some(name) = &patch.name {
        merged.name = Some(name.clone());
    }
    if let Some(kind) = &patch.kind {
        merged.kind = kind.clone();
    }
    if let Some(status) = &patch.status {
        merged.status = Some(status.clone());
    }
    if let Some(external_id) = &patch.external_id {
        merged.external_id = Some(external_id.clone());
    }
    if let Some(avatar_url) = &patch.avatar_url {
        merged.avatar_url = Some(avatar_url.clone());
    }
    if let Some(email) = &patch.email {
        merged.email = Some(email.clone());
    }
    if let Some(custom) = &patch.custom {
        merged.custom = Some(custom.clone());
    }
    merged.version = patch.version.clone();
    merged
}

/// Merge a member patch into an already-fetched row.
pub fn merge_member(existing: &Member, patch: &MemberPatch) -> Member {
    if !patch.version.supersedes(&existing.version) {
        tracing::debug!(
            channel = %existing.channel_id,
            user = %existing.user_id,
            "dropping stale member patch"
        );
        return existing.clone();
    }

    let mut merged = existing.clone();
    if let Some(status) = &patch.status {
        merged.status = Some(status.clone());
    }
    if let Some(custom) = &patch.custom {
        merged.custom = Some(custom.clone());
    }
    if let Some(is_present) = patch.is_present {
        merged.is_present = Some(is_present);
    }
    patch
        .presence_state
        .clone()
        .apply_to(&mut merged.presence_state);
    merged.version = patch.version.clone();
    merged
}

/// Merge a message patch into an already-fetched row.
pub fn merge_message(existing: &Message, patch: &MessagePatch) -> Message {
    if !patch.version.supersedes(&existing.version) {
        tracing::debug!(id = %existing.id, "dropping stale message patch");
        return existing.clone();
    }

    let mut merged = existing.clone();
    if let Some(timetoken) = patch.timetoken {
        merged.timetoken = timetoken;
    }
    if let Some(content) = &patch.content {
        merged.content = content.clone();
    }
    if let Some(custom) = &patch.custom {
        merged.custom = Some(custom.clone());
    }
    merged.version = patch.version.clone();
    merged
}

// ---------------------------------------------------------------------------
// Persisting wrappers
// ---------------------------------------------------------------------------

impl Database {
    /// Fetch, merge and persist a channel patch.  Returns the stored row,
    /// which is the unchanged original when the patch was stale.
    pub fn patch_channel_record(&self, patch: &ChannelPatch) -> Result<Channel> {
        if patch.id.is_empty() {
            return Err(StoreError::MissingRequiredData("channel patch id".into()));
        }
        let existing = self.get_channel(&patch.id)?;
        if !patch.version.supersedes(&existing.version) {
            return Ok(existing);
        }
        let merged = merge_channel(&existing, patch);
        self.replace_channel_row(&merged)?;
        Ok(merged)
    }

    /// Fetch, merge and persist a user patch.
    pub fn patch_user_record(&self, patch: &UserPatch) -> Result<User> {
        if patch.id.is_empty() {
            return Err(StoreError::MissingRequiredData("user patch id".into()));
        }
        let existing = self.get_user(&patch.id)?;
        if !patch.version.supersedes(&existing.version) {
            return Ok(existing);
        }
        let merged = merge_user(&existing, patch);
        self.replace_user_row(&merged)?;
        Ok(merged)
    }

    /// Fetch, merge and persist a member patch.
    pub fn patch_member_record(&self, patch: &MemberPatch) -> Result<Member> {
        if patch.channel_id.is_empty() || patch.user_id.is_empty() {
            return Err(StoreError::MissingRequiredData("member patch identity".into()));
        }
        let existing = self.get_member(&patch.channel_id, &patch.user_id)?;
        if !patch.version.supersedes(&existing.version) {
            return Ok(existing);
        }
        let merged = merge_member(&existing, patch);
        self.replace_member_row(&merged)?;
        Ok(merged)
    }

    /// Fetch, merge and persist a message patch.
    pub fn patch_message_record(&self, patch: &MessagePatch) -> Result<Message> {
        if patch.id.is_empty() {
            return Err(StoreError::MissingRequiredData("message patch id".into()));
        }
        let existing = self.get_message(&patch.id)?;
        if !patch.version.supersedes(&existing.version) {
            return Ok(existing);
        }
        let merged = merge_message(&existing, patch);
        self.replace_message_row(&merged)?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn version(etag: &str, secs: i64) -> VersionMeta {
        VersionMeta {
            etag: Some(etag.to_string()),
            updated_at: Some(Utc.timestamp_opt(secs, 0).unwrap()),
        }
    }

    fn base_channel() -> Channel {
        let mut ch = Channel::stub("c1");
        ch.name = Some("General".into());
        ch.status = Some("open".into());
        ch.version = version("v0", 0);
        ch
    }

    #[test]
    fn merge_overwrites_only_declared_fields() {
        let existing = base_channel();
        let patch = ChannelPatch {
            id: "c1".into(),
            version: version("v1", 10),
            name: Some("Renamed".into()),
            ..Default::default()
        };

        let merged = merge_channel(&existing, &patch);
        assert_eq!(merged.name.as_deref(), Some("Renamed"));
        // Untouched by the patch.
        assert_eq!(merged.status.as_deref(), Some("open"));
        assert_eq!(merged.version, version("v1", 10));
    }

    #[test]
    fn patches_are_monotonic() {
        let original = base_channel();
        let p1 = ChannelPatch {
            id: "c1".into(),
            version: version("v1", 10),
            name: Some("First".into()),
            ..Default::default()
        };
        let p2 = ChannelPatch {
            id: "c1".into(),
            version: version("v2", 20),
            name: Some("Renamed".into()),
            ..Default::default()
        };

        // P1 then P2 equals P2 alone.
        let sequential = merge_channel(&merge_channel(&original, &p1), &p2);
        let direct = merge_channel(&original, &p2);
        assert_eq!(sequential, direct);

        // Re-applying the older patch afterwards is a no-op.
        let after_stale = merge_channel(&sequential, &p1);
        assert_eq!(after_stale, sequential);
        assert_eq!(after_stale.name.as_deref(), Some("Renamed"));
    }

    #[test]
    fn version_token_advances_even_without_visible_change() {
        let existing = base_channel();
        let patch = ChannelPatch {
            id: "c1".into(),
            version: version("v3", 30),
            ..Default::default()
        };

        let merged = merge_channel(&existing, &patch);
        assert_eq!(merged.name, existing.name);
        assert_eq!(merged.version, version("v3", 30));
    }

    #[test]
    fn presence_state_tri_state_semantics() {
        let existing = Member {
            channel_id: "c1".into(),
            user_id: "u1".into(),
            status: None,
            custom: None,
            is_present: Some(true),
            presence_state: Some(serde_json::json!({"typing": true})),
            version: version("v0", 0),
        };

        // Omitted presence fields stay untouched.
        let silent = MemberPatch {
            channel_id: "c1".into(),
            user_id: "u1".into(),
            version: version("v1", 10),
            status: Some("active".into()),
            ..Default::default()
        };
        let merged = merge_member(&existing, &silent);
        assert_eq!(merged.is_present, Some(true));
        assert!(merged.presence_state.is_some());

        // Explicit clear removes the state but leaves is_present alone.
        let clearing = MemberPatch {
            channel_id: "c1".into(),
            user_id: "u1".into(),
            version: version("v2", 20),
            presence_state: OptionalChange::Clear,
            ..Default::default()
        };
        let merged = merge_member(&merged, &clearing);
        assert_eq!(merged.is_present, Some(true));
        assert!(merged.presence_state.is_none());
    }

    #[test]
    fn persisted_patch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();

        let mut ch = base_channel();
        ch.version = version("v1", 10);
        db.upsert_channel(&ch).unwrap();

        let p2 = ChannelPatch {
            id: "c1".into(),
            version: version("v2", 20),
            name: Some("Renamed".into()),
            ..Default::default()
        };
        let stored = db.patch_channel_record(&p2).unwrap();
        assert_eq!(stored.name.as_deref(), Some("Renamed"));

        // The stale v1 patch leaves the row as-is.
        let p1 = ChannelPatch {
            id: "c1".into(),
            version: version("v1", 10),
            name: Some("Old".into()),
            ..Default::default()
        };
        let stored = db.patch_channel_record(&p1).unwrap();
        assert_eq!(stored.name.as_deref(), Some("Renamed"));
        assert_eq!(db.get_channel("c1").unwrap().name.as_deref(), Some("Renamed"));
    }

    #[test]
    fn patching_a_missing_row_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();

        let patch = ChannelPatch {
            id: "ghost".into(),
            version: version("v1", 10),
            ..Default::default()
        };
        assert!(matches!(
            db.patch_channel_record(&patch),
            Err(StoreError::NotFound)
        ));
    }
}
