//! # cirrus-remote
//!
//! Backend client model for a uid-addressed remote store.
//!
//! This crate defines the boundary between the WebDAV-facing layers and the
//! cloud backend:
//! - the canonical [`Node`] snapshot type and the raw [`RemoteNode`] shape
//!   (fully resolved or degraded with per-field errors) it is projected from
//! - the [`RemoteClient`] trait every backend implements
//! - the [`RemoteError`] taxonomy
//! - [`MemoryRemote`], an in-memory backend for tests and demo mounts
//!
//! ## Example
//!
//! ```
//! use cirrus_remote::{MemoryRemote, RemoteClient};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let remote = MemoryRemote::new();
//! let docs = remote.add_folder(&remote.root(), "docs");
//! remote.add_file(&docs, "notes.txt", b"hello");
//!
//! let children = remote.list_folder(&docs).await.unwrap();
//! assert_eq!(children.len(), 1);
//! assert_eq!(children[0].to_node().name, "notes.txt");
//! # }
//! ```

mod client;
mod error;
mod memory;
mod node;

pub use client::{ByteStream, RemoteClient, UploadOptions};
pub use error::{RemoteError, RemoteResult};
pub use memory::MemoryRemote;
pub use node::{DegradedNode, FieldError, Node, NodeDetails, NodeKind, RemoteNode};
