//! Domain model structs persisted in the local replica database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a consumer over IPC or rendered into change notifications.
//! Ids are opaque strings assigned by the remote store; the replica never
//! invents identity except for locally composed messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity type used when the remote payload does not specify one.
pub const DEFAULT_KIND: &str = "default";

// ---------------------------------------------------------------------------
// Version metadata
// ---------------------------------------------------------------------------

/// Per-entity version metadata assigned by the remote store.
///
/// `etag` is an opaque token that changes whenever the entity changes
/// remotely; `updated_at` is the remote's last-modified timestamp.  Both are
/// optional because locally composed rows have neither until acknowledged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionMeta {
    pub etag: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl VersionMeta {
    /// Whether a patch carrying `self` supersedes the cached `other`.
    ///
    /// When both sides carry a timestamp the comparison is strict: newer
    /// wins, older loses regardless of etag.  Ties and absent timestamps
    /// fall back to etag inequality, so a patch whose version equals the
    /// cached version is never applied.
    pub fn supersedes(&self, other: &VersionMeta) -> bool {
        match (self.updated_at, other.updated_at) {
            (Some(patch), Some(cached)) => {
                if patch > cached {
                    true
                } else if patch < cached {
                    false
                } else {
                    self.etag != other.etag
                }
            }
            (Some(_), None) => true,
            _ => self.etag != other.etag,
        }
    }
}

// ---------------------------------------------------------------------------
// Tri-state field update
// ---------------------------------------------------------------------------

/// Tri-state field-update indicator used by patch types.
///
/// Distinguishes "field not mentioned in this patch" (`NoChange`) from
/// "field explicitly cleared" (`Clear`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum OptionalChange<T> {
    #[default]
    NoChange,
    Clear,
    Set(T),
}

impl<T> OptionalChange<T> {
    /// Apply this change to a target field.  `NoChange` leaves it untouched.
    pub fn apply_to(self, target: &mut Option<T>) {
        match self {
            OptionalChange::NoChange => {}
            OptionalChange::Clear => *target = None,
            OptionalChange::Set(value) => *target = Some(value),
        }
    }

    pub fn is_no_change(&self) -> bool {
        matches!(self, OptionalChange::NoChange)
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A conversation channel.
///
/// `member_count` and `message_count` are denormalized aggregates maintained
/// by the store in the same transaction as the member/message write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    /// Remote identifier.
    pub id: String,
    /// Optional human-readable channel name.
    pub name: Option<String>,
    /// Channel type, `"default"` unless the remote says otherwise.
    pub kind: String,
    pub status: Option<String>,
    pub details: Option<String>,
    pub avatar_url: Option<String>,
    /// Opaque custom-field blob.
    pub custom: Option<serde_json::Value>,
    pub version: VersionMeta,
    pub member_count: i64,
    pub message_count: i64,
}

impl Channel {
    /// A channel with only its id populated, used when the remote payload
    /// mentions a peer by id alone.
    pub fn stub(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind: DEFAULT_KIND.to_string(),
            status: None,
            details: None,
            avatar_url: None,
            custom: None,
            version: VersionMeta::default(),
            member_count: 0,
            message_count: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A known user identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Remote identifier.
    pub id: String,
    pub name: Option<String>,
    /// User type, `"default"` unless the remote says otherwise.
    pub kind: String,
    pub status: Option<String>,
    /// Identifier in an external system, if the remote bridges one.
    pub external_id: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub custom: Option<serde_json::Value>,
    pub version: VersionMeta,
}

impl User {
    pub fn stub(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind: DEFAULT_KIND.to_string(),
            status: None,
            external_id: None,
            avatar_url: None,
            email: None,
            custom: None,
            version: VersionMeta::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

/// A Channel x User join row with presence.
///
/// Natural key is the `(channel_id, user_id)` pair; exactly one row exists
/// per pair.  Presence is stored as two independent merge fields --
/// `is_present` is never defaulted when a payload omits it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub channel_id: String,
    pub user_id: String,
    pub status: Option<String>,
    pub custom: Option<serde_json::Value>,
    pub is_present: Option<bool>,
    pub presence_state: Option<serde_json::Value>,
    pub version: VersionMeta,
}

impl Member {
    /// Composite identity, `channelId:userId`.
    pub fn composite_id(&self) -> String {
        format!("{}:{}", self.channel_id, self.user_id)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Message body, a tagged union.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    Link { url: String, description: Option<String> },
    RemoteImage { url: String, mime_type: Option<String> },
    Custom { data: serde_json::Value },
}

/// A single chat message.
///
/// `id` is assigned client-side at composition time and is stable across
/// retries; `timetoken` is the remote-assigned monotonic ordering key and
/// stays `0` until the send is acknowledged.  Idempotent re-send therefore
/// keys on `id`, never on `timetoken`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub timetoken: i64,
    pub created_at: DateTime<Utc>,
    pub content: MessageContent,
    pub custom: Option<serde_json::Value>,
    pub author_user_id: String,
    pub channel_id: String,
    pub version: VersionMeta,
}

// ---------------------------------------------------------------------------
// MessageAction
// ---------------------------------------------------------------------------

/// A reaction or annotation attached to a message.
///
/// Identity is derived from `(user_id, parent_timetoken, action_timetoken)`;
/// those three fields are immutable-by-replacement, so the derived id is
/// recomputed on every write rather than stored on the struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageAction {
    pub user_id: String,
    pub channel_id: String,
    /// Timetoken of the message this action annotates.
    pub parent_timetoken: i64,
    /// Remote-assigned timetoken of the action itself.
    pub action_timetoken: i64,
    /// Action type, e.g. `"reaction"`.
    pub kind: String,
    /// Action value, e.g. the emoji character(s).
    pub value: String,
    pub version: VersionMeta,
}

impl MessageAction {
    /// Derived composite identity.
    pub fn derived_id(&self) -> String {
        derive_action_id(&self.user_id, self.parent_timetoken, self.action_timetoken)
    }
}

/// Compute the derived id of a message action from its three identity inputs.
pub fn derive_action_id(user_id: &str, parent_timetoken: i64, action_timetoken: i64) -> String {
    format!("{user_id}:{parent_timetoken}:{action_timetoken}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta(etag: &str, secs: i64) -> VersionMeta {
        VersionMeta {
            etag: Some(etag.to_string()),
            updated_at: Some(Utc.timestamp_opt(secs, 0).unwrap()),
        }
    }

    #[test]
    fn newer_timestamp_supersedes() {
        assert!(meta("v2", 20).supersedes(&meta("v1", 10)));
        assert!(!meta("v1", 10).supersedes(&meta("v2", 20)));
    }

    #[test]
    fn equal_version_is_a_no_op() {
        assert!(!meta("v1", 10).supersedes(&meta("v1", 10)));
    }

    #[test]
    fn equal_timestamp_falls_back_to_etag() {
        assert!(meta("v2", 10).supersedes(&meta("v1", 10)));
    }

    #[test]
    fn missing_cached_timestamp_lets_patch_through() {
        let cached = VersionMeta { etag: Some("v1".into()), updated_at: None };
        assert!(meta("v2", 10).supersedes(&cached));
    }

    #[test]
    fn optional_change_apply() {
        let mut field = Some(serde_json::json!({"a": 1}));
        OptionalChange::<serde_json::Value>::NoChange.apply_to(&mut field);
        assert!(field.is_some());
        OptionalChange::<serde_json::Value>::Clear.apply_to(&mut field);
        assert!(field.is_none());
        OptionalChange::Set(serde_json::json!(2)).apply_to(&mut field);
        assert_eq!(field, Some(serde_json::json!(2)));
    }

    #[test]
    fn action_id_recomputes_from_inputs() {
        assert_eq!(derive_action_id("u1", 100, 200), "u1:100:200");
    }
}
