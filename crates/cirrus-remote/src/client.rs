//! The backend client contract.

use crate::error::RemoteResult;
use crate::node::RemoteNode;
use futures::future::BoxFuture;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Streaming content crossing the client boundary in either direction.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send + Sync + 'static>>;

/// Options accompanying an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub mime: Option<String>,
    /// Total content length when the caller knows it up front.
    pub size_hint: Option<u64>,
    /// Client-side modification time, unix milliseconds.
    pub modified_at: Option<i64>,
}

/// Client for a uid-addressed remote store.
///
/// Implementations own authentication, encryption and transport; callers see
/// opaque uids and [`RemoteNode`] snapshots. All methods may be called
/// concurrently from many tasks.
pub trait RemoteClient: Send + Sync + 'static {
    /// Uid of the store's root folder.
    fn root_uid(&self) -> BoxFuture<'_, RemoteResult<String>>;

    /// Direct path-to-identity lookup. `Ok(None)` means the backend
    /// authoritatively knows no node at that path; `Err(Unsupported)` means
    /// the capability is unavailable and the caller should resolve another
    /// way.
    fn resolve_path<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<Option<String>>>;

    /// Full details for one node.
    fn node<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, RemoteResult<RemoteNode>>;

    /// Children of a folder, in the backend's listing order.
    fn list_folder<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, RemoteResult<Vec<RemoteNode>>>;

    /// Create an empty folder, returning its uid.
    fn create_folder<'a>(
        &'a self,
        parent_uid: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, RemoteResult<String>>;

    /// Upload a file, returning the uid of the stored node. Uploading over an
    /// existing name replaces the old node with a fresh uid.
    fn upload_file<'a>(
        &'a self,
        parent_uid: &'a str,
        name: &'a str,
        content: ByteStream,
        opts: UploadOptions,
    ) -> BoxFuture<'a, RemoteResult<String>>;

    /// Stream a file's content from the beginning.
    fn download_file<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, RemoteResult<ByteStream>>;

    /// Delete a node; deleting a folder deletes its whole subtree.
    fn delete_node<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, RemoteResult<()>>;

    /// Reparent a node, keeping its name and uid.
    fn move_node<'a>(
        &'a self,
        uid: &'a str,
        new_parent_uid: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Rename a node in place, keeping its uid.
    fn rename_node<'a>(
        &'a self,
        uid: &'a str,
        new_name: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>>;
}
