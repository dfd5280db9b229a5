//! # parley-store
//!
//! Local replica storage for chat state, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model, plus the two write engines of the replica cache: the upsert engine
//! (insert-or-full-replace keyed by natural identity, with foreign-peer
//! resolution) and the patch engine (sparse, version-gated field merges).
//! Schema migrations run before any handle is returned.

pub mod actions;
pub mod channels;
pub mod database;
pub mod members;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod patch;
pub mod upsert;
pub mod users;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use patch::{ChannelPatch, MemberPatch, MessagePatch, UserPatch};
pub use upsert::{ActionUpsert, MemberUpsert, MessageUpsert, PageOutcome, DEFAULT_CHUNK_SIZE};
