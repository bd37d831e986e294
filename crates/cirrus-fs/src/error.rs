use cirrus_remote::RemoteError;
use thiserror::Error;

/// Errors surfaced by the bridge layers (cache, stores, orchestrator).
///
/// Protocol-policy violations carry their specific kind; backend and storage
/// failures are reduced to opaque messages so no transport detail leaks to
/// clients. The enum is `Clone` so one failed fetch can be delivered to every
/// coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// No resource at the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The destination is occupied or incompatible with the operation.
    #[error("conflict at {0}")]
    Conflict(String),

    /// A lock held by another principal, or a bad/missing token.
    #[error("locked: {0}")]
    Locked(String),

    /// The verb is invalid for this resource shape.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Namespace escape, self-containment, or a non-empty-collection
    /// violation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// An intermediate collection of the target path is missing.
    #[error("missing intermediate collection: {0}")]
    TreeIncomplete(String),

    /// The backend's quota is exhausted.
    #[error("insufficient storage")]
    InsufficientStorage,

    /// A durable store (locks/metadata) failed.
    #[error("store error: {0}")]
    Store(String),

    /// Opaque backend/transport failure.
    #[error("remote error: {0}")]
    Remote(String),
}

impl From<RemoteError> for BridgeError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(what) => BridgeError::NotFound(what),
            RemoteError::Conflict(what) => BridgeError::Conflict(what),
            RemoteError::QuotaExceeded => BridgeError::InsufficientStorage,
            RemoteError::Unsupported(_) | RemoteError::Transport(_) | RemoteError::Protocol(_) => {
                BridgeError::Remote(err.to_string())
            }
        }
    }
}

impl From<rusqlite::Error> for BridgeError {
    fn from(err: rusqlite::Error) -> Self {
        BridgeError::Store(err.to_string())
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
