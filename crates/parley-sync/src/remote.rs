//! Boundary to the remote chat service.
//!
//! The remote is an external collaborator: the engine composes its fetch
//! operations with the local upsert/patch machinery but treats its failures
//! as opaque -- status codes and transport detail never leak past
//! [`RemoteError`].

use thiserror::Error;

use parley_store::{
    ActionUpsert, Channel, MemberUpsert, Message, MessageAction, MessageUpsert, User, VersionMeta,
};

use crate::cursor::{Page, PageRequest};

/// Opaque remote failure.  The engine never inspects the payload; it exists
/// only to be reported and logged.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct RemoteError(String);

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Server acknowledgement of a sent message: the assigned timetoken plus the
/// message's initial version metadata.
#[derive(Debug, Clone)]
pub struct MessageReceipt {
    pub timetoken: i64,
    pub version: VersionMeta,
}

/// The remote, paginated, eventually-consistent chat store.
///
/// All operations are asynchronous; page fetches return opaque continuation
/// tokens consumed by [`PageRequest::advance`].  Entity payloads may embed
/// full peer objects (e.g. a message carrying its channel), which the upsert
/// engine resolves recursively.
pub trait RemoteChatService: Send + Sync + 'static {
    // -- Channels -----------------------------------------------------------

    fn fetch_channel(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Channel, RemoteError>> + Send;

    fn fetch_channels(
        &self,
        page: &PageRequest,
    ) -> impl std::future::Future<Output = Result<Page<Channel>, RemoteError>> + Send;

    fn create_channel(
        &self,
        channel: &Channel,
    ) -> impl std::future::Future<Output = Result<Channel, RemoteError>> + Send;

    fn update_channel(
        &self,
        channel: &Channel,
    ) -> impl std::future::Future<Output = Result<Channel, RemoteError>> + Send;

    fn remove_channel(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    // -- Users --------------------------------------------------------------

    fn fetch_user(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<User, RemoteError>> + Send;

    fn fetch_users(
        &self,
        page: &PageRequest,
    ) -> impl std::future::Future<Output = Result<Page<User>, RemoteError>> + Send;

    fn create_user(
        &self,
        user: &User,
    ) -> impl std::future::Future<Output = Result<User, RemoteError>> + Send;

    fn update_user(
        &self,
        user: &User,
    ) -> impl std::future::Future<Output = Result<User, RemoteError>> + Send;

    fn remove_user(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    // -- Members ------------------------------------------------------------

    fn fetch_member(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<MemberUpsert, RemoteError>> + Send;

    fn fetch_members(
        &self,
        channel_id: &str,
        page: &PageRequest,
    ) -> impl std::future::Future<Output = Result<Page<MemberUpsert>, RemoteError>> + Send;

    // -- Messages -----------------------------------------------------------

    fn fetch_message(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<MessageUpsert, RemoteError>> + Send;

    fn fetch_messages(
        &self,
        channel_id: &str,
        page: &PageRequest,
    ) -> impl std::future::Future<Output = Result<Page<MessageUpsert>, RemoteError>> + Send;

    fn remove_message(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    /// Deliver a message.  Re-sending the same content-level id must be
    /// idempotent on the server.
    fn send_message(
        &self,
        message: &Message,
    ) -> impl std::future::Future<Output = Result<MessageReceipt, RemoteError>> + Send;

    /// Deliver an ephemeral signal (e.g. a typing indicator).  Signals are
    /// never cached locally.
    fn send_signal(
        &self,
        channel_id: &str,
        payload: serde_json::Value,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    // -- Message actions ----------------------------------------------------

    fn fetch_actions(
        &self,
        channel_id: &str,
        page: &PageRequest,
    ) -> impl std::future::Future<Output = Result<Page<ActionUpsert>, RemoteError>> + Send;

    /// Attach an action to a message; the returned action carries the
    /// server-assigned action timetoken and version metadata.
    fn add_action(
        &self,
        action: &MessageAction,
    ) -> impl std::future::Future<Output = Result<MessageAction, RemoteError>> + Send;

    fn remove_action(
        &self,
        user_id: &str,
        parent_timetoken: i64,
        action_timetoken: i64,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;
}
