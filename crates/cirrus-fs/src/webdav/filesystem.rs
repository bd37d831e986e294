//! `DavFileSystem` implementation over [`Resource`] orchestrators.

use super::dav_to_path;
use crate::error::BridgeError;
use crate::props::DeadProp;
use crate::resource::{MutationAuth, Resource, UploadSource};
use crate::volume::Volume;
use bytes::Buf;
use cirrus_remote::{ByteStream, Node};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, DavProp, FsError, FsFuture, FsStream,
    OpenOptions, ReadDirMeta,
};
use futures::stream;
use futures::Future;
use http::StatusCode;
use log::{trace, warn};
use std::fmt;
use std::io::{self, SeekFrom, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;

/// WebDAV filesystem adapter for one mounted volume.
#[derive(Clone)]
pub struct CirrusDavFs {
    volume: Arc<Volume>,
}

impl CirrusDavFs {
    pub fn new(volume: Arc<Volume>) -> Self {
        Self { volume }
    }

    fn resource(&self, path: &DavPath) -> Result<Resource, FsError> {
        self.volume
            .resource(&dav_to_path(path))
            .map_err(map_bridge_error)
    }
}

impl DavFileSystem for CirrusDavFs {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        trace!("open({:?}, {:?})", path, options);

        Box::pin(async move {
            let resource = self.resource(path)?;
            if resource.is_root() {
                return Err(FsError::Forbidden);
            }
            if options.append {
                return Err(FsError::NotImplemented);
            }

            let wants_write =
                options.write || options.create || options.create_new || options.truncate;
            if wants_write {
                if self.volume.config().read_only {
                    return Err(FsError::Forbidden);
                }
                let existing = match resource.node().await {
                    Ok(node) => Some(node),
                    Err(BridgeError::NotFound(_)) => None,
                    Err(err) => return Err(map_bridge_error(err)),
                };
                if options.create_new && existing.is_some() {
                    return Err(FsError::Exists);
                }
                if existing.is_none() && !options.create && !options.create_new {
                    return Err(FsError::NotFound);
                }
                if let Some(node) = &existing {
                    if node.is_folder() {
                        return Err(map_bridge_error(BridgeError::MethodNotAllowed(
                            "target is a collection".to_string(),
                        )));
                    }
                }
                let spool = NamedTempFile::new().map_err(map_io_error)?;
                let mime = guess_content_type(resource.path()).to_string();
                let file = DavNodeFile::new_write(resource, spool, mime);
                return Ok(Box::new(file) as Box<dyn DavFile>);
            }

            let node = resource.node().await.map_err(map_bridge_error)?;
            if node.is_folder() {
                return Err(FsError::Forbidden);
            }
            Ok(Box::new(DavNodeFile::new_read(resource, node)) as Box<dyn DavFile>)
        })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        trace!("read_dir({:?})", path);

        Box::pin(async move {
            let resource = self.resource(path)?;
            let listing = resource.listing().await.map_err(map_bridge_error)?;
            let entries: Vec<Box<dyn DavDirEntry>> = listing
                .iter()
                .cloned()
                .map(|node| Box::new(NodeDirEntry { node }) as Box<dyn DavDirEntry>)
                .collect();
            let stream = stream::iter(entries.into_iter().map(Ok));
            Ok(Box::pin(stream) as FsStream<Box<dyn DavDirEntry>>)
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        trace!("metadata({:?})", path);

        Box::pin(async move {
            let resource = self.resource(path)?;
            let node = resource.node().await.map_err(map_bridge_error)?;
            Ok(Box::new(NodeMeta::from(&node)) as Box<dyn DavMetaData>)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("create_dir({:?})", path);

        Box::pin(async move {
            let resource = self.resource(path)?;
            resource
                .create_folder(&MutationAuth::engine_checked())
                .await
                .map(|_| ())
                .map_err(map_bridge_error)
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("remove_dir({:?})", path);

        Box::pin(async move {
            let resource = self.resource(path)?;
            resource
                .delete(&MutationAuth::engine_checked())
                .await
                .map_err(map_bridge_error)
        })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("remove_file({:?})", path);

        Box::pin(async move {
            let resource = self.resource(path)?;
            resource
                .delete(&MutationAuth::engine_checked())
                .await
                .map_err(map_bridge_error)
        })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("rename({:?}, {:?})", from, to);

        Box::pin(async move {
            let resource = self.resource(from)?;
            resource
                .move_to(&dav_to_path(to), &MutationAuth::engine_checked())
                .await
                .map_err(map_bridge_error)
        })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("copy({:?}, {:?})", from, to);

        Box::pin(async move {
            let resource = self.resource(from)?;
            resource
                .copy_to(&dav_to_path(to), &MutationAuth::engine_checked())
                .await
                .map_err(map_bridge_error)
        })
    }

    fn have_props<'a>(
        &'a self,
        _path: &'a DavPath,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { true })
    }

    fn get_props<'a>(&'a self, path: &'a DavPath, do_content: bool) -> FsFuture<'a, Vec<DavProp>> {
        Box::pin(async move {
            let resource = self.resource(path)?;
            let props = resource.dead_props().await.map_err(map_bridge_error)?;
            Ok(props
                .into_iter()
                .map(|p| to_dav_prop(p, do_content))
                .collect())
        })
    }

    fn get_prop<'a>(&'a self, path: &'a DavPath, prop: DavProp) -> FsFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let resource = self.resource(path)?;
            let props = resource.dead_props().await.map_err(map_bridge_error)?;
            props
                .into_iter()
                .find(|p| p.namespace == prop.namespace && p.name == prop.name)
                .map(|p| p.value.into_bytes())
                .ok_or(FsError::NotFound)
        })
    }

    fn patch_props<'a>(
        &'a self,
        path: &'a DavPath,
        patch: Vec<(bool, DavProp)>,
    ) -> FsFuture<'a, Vec<(StatusCode, DavProp)>> {
        trace!("patch_props({:?}, {} item(s))", path, patch.len());

        Box::pin(async move {
            let resource = self.resource(path)?;
            let mut set = Vec::new();
            let mut remove = Vec::new();
            for (is_set, prop) in &patch {
                if *is_set {
                    set.push(from_dav_prop(prop));
                } else {
                    remove.push((prop.namespace.clone(), prop.name.clone()));
                }
            }
            let outcome = resource
                .patch_dead_props(&MutationAuth::engine_checked(), set, remove)
                .await;
            let status = match &outcome {
                Ok(_) => StatusCode::OK,
                Err(err) => patch_status(err),
            };
            Ok(patch
                .into_iter()
                .map(|(_, prop)| (status, strip_prop(prop)))
                .collect())
        })
    }
}

/// Directory entry backed by a cached child node.
struct NodeDirEntry {
    node: Node,
}

impl DavDirEntry for NodeDirEntry {
    fn name(&self) -> Vec<u8> {
        self.node.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = NodeMeta::from(&self.node);
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }
}

#[derive(Debug, Clone)]
struct NodeMeta {
    len: u64,
    is_dir: bool,
    modified: SystemTime,
    created: SystemTime,
}

impl From<&Node> for NodeMeta {
    fn from(node: &Node) -> Self {
        Self {
            len: node.size,
            is_dir: node.is_folder(),
            modified: systime(node.modified_at),
            created: systime(node.created_at),
        }
    }
}

impl DavMetaData for NodeMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> Result<SystemTime, FsError> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn created(&self) -> Result<SystemTime, FsError> {
        Ok(self.created)
    }
}

/// Open file handle: a streaming read or a spooled write.
struct DavNodeFile {
    inner: DavNodeFileInner,
}

impl fmt::Debug for DavNodeFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            DavNodeFileInner::Read(state) => f
                .debug_struct("DavNodeFile")
                .field("mode", &"read")
                .field("path", &state.resource.path())
                .field("position", &state.position)
                .finish(),
            DavNodeFileInner::Write(state) => f
                .debug_struct("DavNodeFile")
                .field("mode", &"write")
                .field("path", &state.resource.path())
                .field("committed", &state.committed)
                .finish(),
        }
    }
}

enum DavNodeFileInner {
    Read(ReadState),
    Write(WriteState),
}

struct ReadState {
    resource: Resource,
    node: Node,
    stream: Option<ByteStream>,
    /// Offset the open stream has reached.
    stream_pos: u64,
    /// Offset the client asked for.
    position: u64,
}

struct WriteState {
    resource: Resource,
    spool: Option<NamedTempFile>,
    mime: String,
    created: SystemTime,
    modified: SystemTime,
    committed: bool,
}

impl DavNodeFile {
    fn new_read(resource: Resource, node: Node) -> Self {
        Self {
            inner: DavNodeFileInner::Read(ReadState {
                resource,
                node,
                stream: None,
                stream_pos: 0,
                position: 0,
            }),
        }
    }

    fn new_write(resource: Resource, spool: NamedTempFile, mime: String) -> Self {
        let now = SystemTime::now();
        Self {
            inner: DavNodeFileInner::Write(WriteState {
                resource,
                spool: Some(spool),
                mime,
                created: now,
                modified: now,
                committed: false,
            }),
        }
    }
}

impl DavFile for DavNodeFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = match &self.inner {
            DavNodeFileInner::Read(state) => NodeMeta::from(&state.node),
            DavNodeFileInner::Write(state) => NodeMeta {
                len: spool_len(state),
                is_dir: false,
                modified: state.modified,
                created: state.created,
            },
        };
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, bytes::Bytes> {
        Box::pin(async move {
            match &mut self.inner {
                DavNodeFileInner::Read(state) => read_at_position(state, count).await,
                DavNodeFileInner::Write(_) => Err(FsError::Forbidden),
            }
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            match &mut self.inner {
                DavNodeFileInner::Read(state) => seek_position(state, pos),
                DavNodeFileInner::Write(_) => Ok(0),
            }
        })
    }

    fn write_buf(&mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        let result = match &mut self.inner {
            DavNodeFileInner::Write(state) => (|| {
                while buf.has_remaining() {
                    let chunk = buf.chunk();
                    if chunk.is_empty() {
                        break;
                    }
                    write_to_spool(state, chunk)?;
                    let len = chunk.len();
                    buf.advance(len);
                }
                Ok(())
            })(),
            DavNodeFileInner::Read(_) => Err(FsError::Forbidden),
        };
        Box::pin(async move { result })
    }

    fn write_bytes(&mut self, buf: bytes::Bytes) -> FsFuture<'_, ()> {
        let result = match &mut self.inner {
            DavNodeFileInner::Write(state) => write_to_spool(state, &buf),
            DavNodeFileInner::Read(_) => Err(FsError::Forbidden),
        };
        Box::pin(async move { result })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            match &mut self.inner {
                DavNodeFileInner::Write(state) => commit_spool(state).await,
                DavNodeFileInner::Read(_) => Ok(()),
            }
        })
    }
}

async fn read_at_position(state: &mut ReadState, count: usize) -> Result<bytes::Bytes, FsError> {
    if state.position >= state.node.size || count == 0 {
        return Ok(bytes::Bytes::new());
    }
    // A backwards seek re-opens the download from the start.
    if state.stream.is_some() && state.position < state.stream_pos {
        state.stream = None;
        state.stream_pos = 0;
    }
    if state.stream.is_none() {
        let (_, stream) = state.resource.download().await.map_err(map_bridge_error)?;
        state.stream = Some(stream);
        state.stream_pos = 0;
    }
    let Some(stream) = state.stream.as_mut() else {
        return Err(FsError::GeneralFailure);
    };
    // Skip forward to the requested offset.
    while state.stream_pos < state.position {
        let gap = (state.position - state.stream_pos).min(64 * 1024) as usize;
        let mut skip = vec![0u8; gap];
        let n = stream
            .read(&mut skip)
            .await
            .map_err(|_| FsError::GeneralFailure)?;
        if n == 0 {
            return Ok(bytes::Bytes::new());
        }
        state.stream_pos += n as u64;
    }
    let mut buf = vec![0u8; count];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|_| FsError::GeneralFailure)?;
    buf.truncate(n);
    state.stream_pos += n as u64;
    state.position += n as u64;
    Ok(bytes::Bytes::from(buf))
}

fn seek_position(state: &mut ReadState, pos: SeekFrom) -> Result<u64, FsError> {
    let target = match pos {
        SeekFrom::Start(n) => n as i64,
        SeekFrom::End(n) => state.node.size as i64 + n,
        SeekFrom::Current(n) => state.position as i64 + n,
    };
    if target < 0 {
        return Err(FsError::GeneralFailure);
    }
    state.position = target as u64;
    Ok(state.position)
}

fn spool_len(state: &WriteState) -> u64 {
    state
        .spool
        .as_ref()
        .and_then(|s| s.as_file().metadata().ok())
        .map(|m| m.len())
        .unwrap_or(0)
}

fn write_to_spool(state: &mut WriteState, chunk: &[u8]) -> Result<(), FsError> {
    if state.committed {
        return Err(FsError::Forbidden);
    }
    let Some(spool) = state.spool.as_mut() else {
        return Err(FsError::GeneralFailure);
    };
    spool.as_file_mut().write_all(chunk).map_err(map_io_error)?;
    state.modified = SystemTime::now();
    Ok(())
}

async fn commit_spool(state: &mut WriteState) -> Result<(), FsError> {
    if state.committed {
        return Ok(());
    }
    let Some(spool) = state.spool.take() else {
        return Ok(());
    };
    spool.as_file().sync_all().map_err(map_io_error)?;
    let len = spool
        .as_file()
        .metadata()
        .map(|m| m.len())
        .map_err(map_io_error)?;
    let reopened = spool.reopen().map_err(map_io_error)?;
    let source = UploadSource {
        content: Box::pin(tokio::fs::File::from_std(reopened)),
        size_hint: Some(len),
        mime: Some(state.mime.clone()),
    };
    state
        .resource
        .write(&MutationAuth::engine_checked(), source)
        .await
        .map_err(map_bridge_error)?;
    state.committed = true;
    Ok(())
}

fn to_dav_prop(prop: DeadProp, with_content: bool) -> DavProp {
    DavProp {
        name: prop.name,
        prefix: prop.prefix,
        namespace: prop.namespace,
        xml: with_content.then(|| prop.value.into_bytes()),
    }
}

fn from_dav_prop(prop: &DavProp) -> DeadProp {
    DeadProp {
        name: prop.name.clone(),
        prefix: prop.prefix.clone(),
        namespace: prop.namespace.clone(),
        value: prop
            .xml
            .as_ref()
            .map(|xml| String::from_utf8_lossy(xml).into_owned())
            .unwrap_or_default(),
    }
}

fn strip_prop(mut prop: DavProp) -> DavProp {
    prop.xml = None;
    prop
}

fn patch_status(err: &BridgeError) -> StatusCode {
    match err {
        BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
        BridgeError::Forbidden(_) | BridgeError::Locked(_) => StatusCode::FORBIDDEN,
        BridgeError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        BridgeError::Conflict(_) | BridgeError::TreeIncomplete(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn map_bridge_error(err: BridgeError) -> FsError {
    match err {
        BridgeError::NotFound(_) => FsError::NotFound,
        BridgeError::Conflict(_) => FsError::Exists,
        BridgeError::Locked(_) | BridgeError::Forbidden(_) => FsError::Forbidden,
        BridgeError::MethodNotAllowed(_) => FsError::NotImplemented,
        // The engine turns a missing parent into 409 for MKCOL/PUT.
        BridgeError::TreeIncomplete(_) => FsError::NotFound,
        BridgeError::InsufficientStorage => FsError::InsufficientStorage,
        BridgeError::Store(msg) | BridgeError::Remote(msg) => {
            warn!("internal failure surfaced to client: {msg}");
            FsError::GeneralFailure
        }
    }
}

fn map_io_error(err: io::Error) -> FsError {
    match err.kind() {
        io::ErrorKind::NotFound => FsError::NotFound,
        io::ErrorKind::PermissionDenied => FsError::Forbidden,
        io::ErrorKind::AlreadyExists => FsError::Exists,
        _ => FsError::GeneralFailure,
    }
}

fn guess_content_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|v| v.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "html" | "htm" => "text/html",
        "md" => "text/markdown",
        _ => "application/octet-stream",
    }
}

fn systime(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}
