use thiserror::Error;

use parley_store::StoreError;

use crate::cursor::PageRequest;
use crate::remote::RemoteError;

/// Errors produced by the synchronization engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote service failed.  The error itself is opaque; when the
    /// failure happened during a cursor walk, `request` carries the exact
    /// page request that failed so a retry can resume where the walk
    /// stopped.
    #[error("Remote failure: {source}")]
    Remote {
        request: Option<PageRequest>,
        source: RemoteError,
    },

    /// The local store failed.
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    pub(crate) fn remote(source: RemoteError) -> Self {
        SyncError::Remote { request: None, source }
    }

    pub(crate) fn remote_page(request: PageRequest, source: RemoteError) -> Self {
        SyncError::Remote { request: Some(request), source }
    }

    /// The page request that failed, if this error interrupted a walk.
    pub fn failed_request(&self) -> Option<&PageRequest> {
        match self {
            SyncError::Remote { request, .. } => request.as_ref(),
            SyncError::Store(_) => None,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
