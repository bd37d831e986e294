//! # cirrus-fs
//!
//! WebDAV bridge for a uid-addressed remote store.
//!
//! Desktop file managers speak a path-hierarchical protocol (RFC 4918);
//! the backend speaks opaque, stable node uids. This crate is the subsystem
//! between the two:
//! - [`NodeCache`]: path-to-node and folder-listing cache with TTL
//!   freshness and single-flight fetch coalescing
//! - [`LockStore`]: durable RFC 4918 locks with conflict and expiry logic
//! - [`PropStore`]: durable dead properties keyed by node identity, so
//!   metadata survives rename/move and dies with the node
//! - [`Resource`]: per-path verb orchestration over the three, plus the
//!   remote client
//! - [`webdav`]: the thin adapter wiring a generic WebDAV engine
//!   (`dav-server`) and a hyper server loop to the above
//!
//! ## Example
//!
//! ```ignore
//! use cirrus_fs::{webdav, MountConfig, Volume};
//! use cirrus_remote::MemoryRemote;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let remote = Arc::new(MemoryRemote::new());
//!     let volume = Volume::open(remote, MountConfig::default()).await.unwrap();
//!
//!     // Serve on port 4918 (blocks until Ctrl+C); mount http://localhost:4918
//!     webdav::serve(volume, 4918).await
//! }
//! ```

mod cache;
mod config;
mod error;
mod locks;
pub mod paths;
mod props;
mod resource;
mod volume;
pub mod webdav;

pub use cache::{Listing, NodeCache};
pub use config::MountConfig;
pub use error::{BridgeError, BridgeResult};
pub use locks::{
    normalize_token, LockDepth, LockError, LockRecord, LockRequest, LockScope, LockStore,
    TOKEN_PREFIX,
};
pub use props::{DeadProp, PropSet, PropStore};
pub use resource::{MutationAuth, Resource, UploadSource, REMOTE_PROP_NAMESPACE};
pub use volume::Volume;

// Re-export the client-side types callers need to build a volume.
pub use cirrus_remote::{ByteStream, Node, NodeKind, RemoteClient};
