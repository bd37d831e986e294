//! In-memory [`RemoteClient`] implementation.
//!
//! Backs the test suites and the demo mount. Uids are deterministic
//! (`uid-000001`, …), listing calls are counted, and a handful of knobs
//! (latency, fault injection, capability toggles) let tests exercise the
//! degraded paths of the layers above.

use crate::client::{ByteStream, RemoteClient, UploadOptions};
use crate::error::{RemoteError, RemoteResult};
use crate::node::{DegradedNode, FieldError, NodeDetails, NodeKind, RemoteNode};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;

const ROOT_UID: &str = "uid-root";

#[derive(Debug, Default)]
struct MemState {
    nodes: HashMap<String, NodeDetails>,
    blobs: HashMap<String, Vec<u8>>,
    /// Uids that report a degraded node shape.
    degraded: HashSet<String>,
    /// When set, every listing call fails with this message.
    listing_fault: Option<String>,
    /// Remaining upload capacity in bytes, if capped.
    quota: Option<u64>,
    next_uid: u64,
}

/// In-memory uid-addressed store.
#[derive(Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemState>>,
    listing_calls: Arc<AtomicUsize>,
    path_lookup: bool,
    listing_delay: Option<Duration>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let mut state = MemState::default();
        state.nodes.insert(
            ROOT_UID.to_string(),
            NodeDetails {
                uid: ROOT_UID.to_string(),
                name: String::new(),
                kind: NodeKind::Folder,
                size: 0,
                mime: None,
                created_at: now_ms(),
                modified_at: now_ms(),
                parent_uid: None,
                attributes: HashMap::new(),
            },
        );
        Self {
            state: Arc::new(Mutex::new(state)),
            listing_calls: Arc::new(AtomicUsize::new(0)),
            path_lookup: true,
            listing_delay: None,
        }
    }

    /// Disable (or re-enable) the direct path-lookup capability; with it off,
    /// `resolve_path` fails with [`RemoteError::Unsupported`].
    pub fn with_path_lookup(mut self, enabled: bool) -> Self {
        self.path_lookup = enabled;
        self
    }

    /// Delay every listing call, so tests can overlap concurrent fetches.
    pub fn with_listing_delay(mut self, delay: Duration) -> Self {
        self.listing_delay = Some(delay);
        self
    }

    pub fn root(&self) -> String {
        ROOT_UID.to_string()
    }

    /// Number of `list_folder` calls that reached this backend.
    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent listing call fail (or clear the fault).
    pub fn set_listing_fault(&self, message: Option<&str>) {
        self.state.lock().unwrap().listing_fault = message.map(str::to_string);
    }

    /// Cap remaining upload capacity; `None` removes the cap.
    pub fn set_quota(&self, bytes: Option<u64>) {
        self.state.lock().unwrap().quota = bytes;
    }

    /// Report this uid as a degraded node from now on.
    pub fn mark_degraded(&self, uid: &str) {
        self.state.lock().unwrap().degraded.insert(uid.to_string());
    }

    /// Attach an extension attribute to a node.
    pub fn set_attribute(&self, uid: &str, key: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(uid) {
            node.attributes.insert(key.to_string(), value.to_string());
        }
    }

    /// Seed a folder synchronously; panics on bad parents (test setup only).
    pub fn add_folder(&self, parent_uid: &str, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        create_folder_locked(&mut state, parent_uid, name).unwrap()
    }

    /// Seed a file synchronously; panics on bad parents (test setup only).
    pub fn add_file(&self, parent_uid: &str, name: &str, content: &[u8]) -> String {
        let mut state = self.state.lock().unwrap();
        store_file_locked(&mut state, parent_uid, name, content.to_vec(), None, None).unwrap()
    }

    /// Raw stored bytes for a file uid.
    pub fn blob(&self, uid: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().blobs.get(uid).cloned()
    }

    /// Whether any node with this uid still exists.
    pub fn contains(&self, uid: &str) -> bool {
        self.state.lock().unwrap().nodes.contains_key(uid)
    }

    fn child_uid(state: &MemState, parent_uid: &str, name: &str) -> Option<String> {
        state
            .nodes
            .values()
            .find(|n| n.parent_uid.as_deref() == Some(parent_uid) && n.name == name)
            .map(|n| n.uid.clone())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn fresh_uid(state: &mut MemState) -> String {
    state.next_uid += 1;
    format!("uid-{:06}", state.next_uid)
}

fn require_folder<'a>(state: &'a MemState, uid: &str) -> RemoteResult<&'a NodeDetails> {
    let node = state
        .nodes
        .get(uid)
        .ok_or_else(|| RemoteError::NotFound(uid.to_string()))?;
    if !node.kind.is_folder() {
        return Err(RemoteError::Protocol(format!("{uid} is not a folder")));
    }
    Ok(node)
}

fn create_folder_locked(state: &mut MemState, parent_uid: &str, name: &str) -> RemoteResult<String> {
    require_folder(state, parent_uid)?;
    if MemoryRemote::child_uid(state, parent_uid, name).is_some() {
        return Err(RemoteError::Conflict(name.to_string()));
    }
    let uid = fresh_uid(state);
    let now = now_ms();
    state.nodes.insert(
        uid.clone(),
        NodeDetails {
            uid: uid.clone(),
            name: name.to_string(),
            kind: NodeKind::Folder,
            size: 0,
            mime: None,
            created_at: now,
            modified_at: now,
            parent_uid: Some(parent_uid.to_string()),
            attributes: HashMap::new(),
        },
    );
    Ok(uid)
}

fn store_file_locked(
    state: &mut MemState,
    parent_uid: &str,
    name: &str,
    content: Vec<u8>,
    mime: Option<String>,
    modified_at: Option<i64>,
) -> RemoteResult<String> {
    require_folder(state, parent_uid)?;
    if let Some(remaining) = state.quota {
        if content.len() as u64 > remaining {
            return Err(RemoteError::QuotaExceeded);
        }
        state.quota = Some(remaining - content.len() as u64);
    }
    // Replacing an existing name produces a fresh uid, like the real store.
    if let Some(old_uid) = MemoryRemote::child_uid(state, parent_uid, name) {
        let old = state
            .nodes
            .get(&old_uid)
            .ok_or_else(|| RemoteError::NotFound(old_uid.clone()))?;
        if old.kind.is_folder() {
            return Err(RemoteError::Conflict(name.to_string()));
        }
        state.nodes.remove(&old_uid);
        state.blobs.remove(&old_uid);
    }
    let uid = fresh_uid(state);
    let now = now_ms();
    state.nodes.insert(
        uid.clone(),
        NodeDetails {
            uid: uid.clone(),
            name: name.to_string(),
            kind: NodeKind::File,
            size: content.len() as u64,
            mime,
            created_at: now,
            modified_at: modified_at.unwrap_or(now),
            parent_uid: Some(parent_uid.to_string()),
            attributes: HashMap::new(),
        },
    );
    state.blobs.insert(uid.clone(), content);
    Ok(uid)
}

fn remote_node_locked(state: &MemState, uid: &str) -> RemoteResult<RemoteNode> {
    let details = state
        .nodes
        .get(uid)
        .ok_or_else(|| RemoteError::NotFound(uid.to_string()))?;
    if state.degraded.contains(uid) {
        return Ok(RemoteNode::Degraded {
            partial: DegradedNode {
                uid: details.uid.clone(),
                name: Some(details.name.clone()),
                kind: Some(details.kind),
                size: None,
                mime: None,
                created_at: None,
                modified_at: None,
                parent_uid: details.parent_uid.clone(),
                attributes: details.attributes.clone(),
            },
            errors: vec![
                FieldError {
                    field: "size".to_string(),
                    message: "metadata undecryptable".to_string(),
                },
                FieldError {
                    field: "modifiedAt".to_string(),
                    message: "metadata undecryptable".to_string(),
                },
            ],
        });
    }
    Ok(RemoteNode::Resolved(details.clone()))
}

impl RemoteClient for MemoryRemote {
    fn root_uid(&self) -> BoxFuture<'_, RemoteResult<String>> {
        async move { Ok(ROOT_UID.to_string()) }.boxed()
    }

    fn resolve_path<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<Option<String>>> {
        async move {
            if !self.path_lookup {
                return Err(RemoteError::Unsupported("path lookup disabled".to_string()));
            }
            let state = self.state.lock().unwrap();
            let mut uid = ROOT_UID.to_string();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                match MemoryRemote::child_uid(&state, &uid, segment) {
                    Some(child) => uid = child,
                    None => return Ok(None),
                }
            }
            Ok(Some(uid))
        }
        .boxed()
    }

    fn node<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, RemoteResult<RemoteNode>> {
        async move {
            let state = self.state.lock().unwrap();
            remote_node_locked(&state, uid)
        }
        .boxed()
    }

    fn list_folder<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, RemoteResult<Vec<RemoteNode>>> {
        async move {
            if let Some(delay) = self.listing_delay {
                tokio::time::sleep(delay).await;
            }
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            let state = self.state.lock().unwrap();
            if let Some(message) = &state.listing_fault {
                return Err(RemoteError::Transport(message.clone()));
            }
            require_folder(&state, uid)?;
            let mut children: Vec<&NodeDetails> = state
                .nodes
                .values()
                .filter(|n| n.parent_uid.as_deref() == Some(uid))
                .collect();
            children.sort_by(|a, b| a.name.cmp(&b.name));
            children
                .into_iter()
                .map(|n| remote_node_locked(&state, &n.uid))
                .collect()
        }
        .boxed()
    }

    fn create_folder<'a>(
        &'a self,
        parent_uid: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, RemoteResult<String>> {
        async move {
            let mut state = self.state.lock().unwrap();
            create_folder_locked(&mut state, parent_uid, name)
        }
        .boxed()
    }

    fn upload_file<'a>(
        &'a self,
        parent_uid: &'a str,
        name: &'a str,
        mut content: ByteStream,
        opts: UploadOptions,
    ) -> BoxFuture<'a, RemoteResult<String>> {
        async move {
            let mut bytes = Vec::with_capacity(opts.size_hint.unwrap_or(0) as usize);
            content
                .read_to_end(&mut bytes)
                .await
                .map_err(|e| RemoteError::Transport(e.to_string()))?;
            let mut state = self.state.lock().unwrap();
            store_file_locked(&mut state, parent_uid, name, bytes, opts.mime, opts.modified_at)
        }
        .boxed()
    }

    fn download_file<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, RemoteResult<ByteStream>> {
        async move {
            let state = self.state.lock().unwrap();
            let node = state
                .nodes
                .get(uid)
                .ok_or_else(|| RemoteError::NotFound(uid.to_string()))?;
            if node.kind.is_folder() {
                return Err(RemoteError::Protocol(format!("{uid} is a folder")));
            }
            let bytes = state.blobs.get(uid).cloned().unwrap_or_default();
            Ok(Box::pin(Cursor::new(bytes)) as ByteStream)
        }
        .boxed()
    }

    fn delete_node<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            if !state.nodes.contains_key(uid) {
                return Err(RemoteError::NotFound(uid.to_string()));
            }
            let mut pending = vec![uid.to_string()];
            while let Some(current) = pending.pop() {
                let children: Vec<String> = state
                    .nodes
                    .values()
                    .filter(|n| n.parent_uid.as_deref() == Some(current.as_str()))
                    .map(|n| n.uid.clone())
                    .collect();
                pending.extend(children);
                state.nodes.remove(&current);
                state.blobs.remove(&current);
            }
            Ok(())
        }
        .boxed()
    }

    fn move_node<'a>(
        &'a self,
        uid: &'a str,
        new_parent_uid: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            require_folder(&state, new_parent_uid)?;
            let name = state
                .nodes
                .get(uid)
                .ok_or_else(|| RemoteError::NotFound(uid.to_string()))?
                .name
                .clone();
            if let Some(existing) = MemoryRemote::child_uid(&state, new_parent_uid, &name) {
                if existing != uid {
                    return Err(RemoteError::Conflict(name));
                }
            }
            let node = state
                .nodes
                .get_mut(uid)
                .ok_or_else(|| RemoteError::NotFound(uid.to_string()))?;
            node.parent_uid = Some(new_parent_uid.to_string());
            node.modified_at = now_ms();
            Ok(())
        }
        .boxed()
    }

    fn rename_node<'a>(
        &'a self,
        uid: &'a str,
        new_name: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            let parent = state
                .nodes
                .get(uid)
                .ok_or_else(|| RemoteError::NotFound(uid.to_string()))?
                .parent_uid
                .clone();
            if let Some(parent_uid) = &parent {
                if let Some(existing) = MemoryRemote::child_uid(&state, parent_uid, new_name) {
                    if existing != uid {
                        return Err(RemoteError::Conflict(new_name.to_string()));
                    }
                }
            }
            let node = state
                .nodes
                .get_mut(uid)
                .ok_or_else(|| RemoteError::NotFound(uid.to_string()))?;
            node.name = new_name.to_string();
            node.modified_at = now_ms();
            Ok(())
        }
        .boxed()
    }
}
