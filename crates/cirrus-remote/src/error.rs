use thiserror::Error;

/// Errors reported by a [`RemoteClient`](crate::RemoteClient) implementation.
///
/// Variants are `Clone` so a single backend failure can be handed to every
/// caller of a deduplicated request.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The addressed node does not exist on the backend.
    #[error("remote node not found: {0}")]
    NotFound(String),

    /// The destination name is already taken.
    #[error("remote name conflict: {0}")]
    Conflict(String),

    /// The backend does not offer this capability (or it is temporarily
    /// unavailable); callers may degrade to a slower strategy.
    #[error("remote capability unavailable: {0}")]
    Unsupported(String),

    /// The account's storage quota is exhausted.
    #[error("remote storage quota exhausted")]
    QuotaExceeded,

    /// Network-level failure talking to the backend.
    #[error("remote transport error: {0}")]
    Transport(String),

    /// The backend answered with something we could not interpret.
    #[error("remote protocol error: {0}")]
    Protocol(String),
}

/// Result type for remote client operations.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
