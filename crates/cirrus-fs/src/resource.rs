//! Per-path verb orchestration.
//!
//! A [`Resource`] is built per requested path and composes the node cache,
//! the lock store, the property store and the remote client into full verb
//! semantics: existence and overwrite rules, lock-aware guards, cache
//! invalidation on mutation, and metadata lifecycle tied to node identity.

use crate::cache::Listing;
use crate::error::{BridgeError, BridgeResult};
use crate::paths;
use crate::props::DeadProp;
use crate::volume::Volume;
use cirrus_remote::{ByteStream, Node, UploadOptions};
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, trace, warn};
use std::sync::Arc;

/// Namespace under which backend extension metadata is imported as dead
/// properties.
pub const REMOTE_PROP_NAMESPACE: &str = "urn:x-cirrus:remote-meta";

/// Who is asking for a mutation, and with what proof.
///
/// The WebDAV engine evaluates `If:` headers against the lock system before
/// dispatching a verb; the adapter marks such calls as already checked.
/// Programmatic callers supply a principal and optionally a token and get
/// the same policy applied here.
#[derive(Debug, Clone, Default)]
pub struct MutationAuth {
    pub principal: Option<String>,
    pub token: Option<String>,
    engine_checked: bool,
}

impl MutationAuth {
    /// The protocol engine already ran the lock check for this call.
    pub fn engine_checked() -> Self {
        Self {
            engine_checked: true,
            ..Self::default()
        }
    }

    pub fn for_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Content handed to [`Resource::write`].
pub struct UploadSource {
    pub content: ByteStream,
    pub size_hint: Option<u64>,
    pub mime: Option<String>,
}

/// Orchestrator for one path of one volume.
#[derive(Clone)]
pub struct Resource {
    volume: Arc<Volume>,
    path: String,
}

impl Resource {
    pub(crate) fn new(volume: Arc<Volume>, path: &str) -> BridgeResult<Self> {
        Ok(Self {
            volume,
            path: paths::normalize(path)?,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        paths::is_root(&self.path)
    }

    /// Resolve this path to its node. The root always exists and is a folder
    /// with an empty display name.
    pub async fn node(&self) -> BridgeResult<Node> {
        self.volume.cache().resolve(&self.path).await
    }

    pub async fn exists(&self) -> BridgeResult<bool> {
        match self.node().await {
            Ok(_) => Ok(true),
            Err(BridgeError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Canonical form of this path: trailing slash for collections, none for
    /// files.
    pub async fn canonical_path(&self) -> BridgeResult<String> {
        let node = self.node().await?;
        Ok(paths::canonical(&self.path, node.is_folder()))
    }

    /// Children of this collection.
    pub async fn listing(&self) -> BridgeResult<Listing> {
        let node = self.node().await?;
        if !node.is_folder() {
            return Err(BridgeError::MethodNotAllowed(format!(
                "{} is not a collection",
                self.path
            )));
        }
        self.volume.cache().folder_listing(&node.uid).await
    }

    fn check_writable(&self) -> BridgeResult<()> {
        if self.volume.config().read_only {
            return Err(BridgeError::Forbidden("read-only mount".to_string()));
        }
        Ok(())
    }

    fn check_lock(&self, auth: &MutationAuth) -> BridgeResult<()> {
        if auth.engine_checked {
            return Ok(());
        }
        self.volume.locks().check_access(
            &self.path,
            auth.principal.as_deref(),
            auth.token.as_deref(),
        )
    }

    /// Parent of this path, which must resolve to a folder.
    async fn parent_folder(&self) -> BridgeResult<Node> {
        let parent = paths::parent(&self.path)
            .ok_or_else(|| BridgeError::Forbidden("root has no parent".to_string()))?;
        match self.volume.cache().resolve(parent).await {
            Ok(node) if node.is_folder() => Ok(node),
            Ok(_) | Err(BridgeError::NotFound(_)) => {
                Err(BridgeError::TreeIncomplete(parent.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// MKCOL: create a collection at this path.
    pub async fn create_folder(&self, _auth: &MutationAuth) -> BridgeResult<Node> {
        self.check_writable()?;
        if self.is_root() || self.exists().await? {
            return Err(BridgeError::Conflict(self.path.clone()));
        }
        let parent = self.parent_folder().await?;
        let uid = self
            .volume
            .remote()
            .create_folder(&parent.uid, paths::name(&self.path))
            .await
            .map_err(BridgeError::from)?;
        self.volume.cache().invalidate_folder(&parent.uid);
        let node = self.fetch_and_cache(&uid).await?;
        debug!("created collection {} ({uid})", self.path);
        Ok(node)
    }

    /// PUT: store content at this path, creating or overwriting a file.
    /// Overwriting an existing collection is refused.
    pub async fn write(&self, _auth: &MutationAuth, source: UploadSource) -> BridgeResult<Node> {
        self.check_writable()?;
        if self.is_root() {
            return Err(BridgeError::MethodNotAllowed(
                "cannot PUT the root".to_string(),
            ));
        }
        let existing = match self.node().await {
            Ok(node) => Some(node),
            Err(BridgeError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };
        if let Some(node) = &existing {
            if node.is_folder() {
                return Err(BridgeError::MethodNotAllowed(format!(
                    "{} is a collection",
                    self.path
                )));
            }
        }
        let parent = self.parent_folder().await?;
        let opts = UploadOptions {
            mime: source.mime,
            size_hint: source.size_hint,
            modified_at: None,
        };
        let uid = self
            .volume
            .remote()
            .upload_file(&parent.uid, paths::name(&self.path), source.content, opts)
            .await
            .map_err(BridgeError::from)?;
        self.volume.cache().invalidate_folder(&parent.uid);
        // An overwrite rotates the node identity; the replaced node's
        // properties go with it.
        if let Some(old) = existing {
            if old.uid != uid {
                self.volume.props().delete(&old.uid)?;
            }
        }
        let node = self.fetch_and_cache(&uid).await?;
        debug!("stored {} ({} bytes as {uid})", self.path, node.size);
        Ok(node)
    }

    /// GET: the node plus a content stream from offset zero.
    pub async fn download(&self) -> BridgeResult<(Node, ByteStream)> {
        let node = self.node().await?;
        if node.is_folder() {
            return Err(BridgeError::MethodNotAllowed(format!(
                "{} is a collection",
                self.path
            )));
        }
        let stream = self
            .volume
            .remote()
            .download_file(&node.uid)
            .await
            .map_err(BridgeError::from)?;
        Ok((node, stream))
    }

    /// DELETE: remove this resource, its locks at this exact path, and its
    /// metadata. For a collection the metadata of the whole subtree goes
    /// too; node records must never be silently orphaned.
    pub async fn delete(&self, auth: &MutationAuth) -> BridgeResult<()> {
        self.check_writable()?;
        if self.is_root() {
            return Err(BridgeError::Forbidden("cannot delete the root".to_string()));
        }
        self.check_lock(auth)?;
        let node = self.node().await?;
        let uids = if node.is_folder() {
            self.subtree_uids(node.clone()).await?
        } else {
            vec![node.uid.clone()]
        };
        self.volume
            .remote()
            .delete_node(&node.uid)
            .await
            .map_err(BridgeError::from)?;
        self.volume.locks().delete_locks_for_path(&self.path)?;
        for uid in &uids {
            self.volume.props().delete(uid)?;
        }
        match &node.parent_uid {
            Some(parent_uid) => self.volume.cache().invalidate_folder(parent_uid),
            None => self.volume.cache().clear(),
        }
        debug!("deleted {} ({})", self.path, node.uid);
        Ok(())
    }

    /// COPY: duplicate this resource at `dest_path`. Folders copy
    /// recursively; file content is streamed through, never buffered whole.
    pub async fn copy_to(&self, dest_path: &str, auth: &MutationAuth) -> BridgeResult<()> {
        self.check_writable()?;
        self.check_lock(auth)?;
        let dest_path = paths::normalize(dest_path)?;
        if paths::contains(&self.path, &dest_path) {
            return Err(BridgeError::Forbidden(format!(
                "cannot copy {} into itself",
                self.path
            )));
        }
        let source = self.node().await?;
        let dest = self.volume.resource(&dest_path)?;
        let dest_parent = dest.parent_folder().await?;
        dest.displace_existing(auth).await?;
        self.copy_tree(&source, &dest_parent.uid, paths::name(&dest_path))
            .await?;
        self.volume.cache().invalidate_folder(&dest_parent.uid);
        debug!("copied {} to {dest_path}", self.path);
        Ok(())
    }

    /// MOVE: relocate a file to `dest_path`. Collections do not move.
    pub async fn move_to(&self, dest_path: &str, auth: &MutationAuth) -> BridgeResult<()> {
        self.check_writable()?;
        self.check_lock(auth)?;
        let dest_path = paths::normalize(dest_path)?;
        if paths::contains(&self.path, &dest_path) {
            return Err(BridgeError::Forbidden(format!(
                "cannot move {} into itself",
                self.path
            )));
        }
        let source = self.node().await?;
        if source.is_folder() {
            return Err(BridgeError::MethodNotAllowed(
                "collections cannot be moved".to_string(),
            ));
        }
        let dest = self.volume.resource(&dest_path)?;
        let dest_parent = dest.parent_folder().await?;
        dest.displace_existing(auth).await?;
        // Tokens for the old path must not replay once the node has left it.
        self.volume.locks().delete_locks_for_path(&self.path)?;
        let source_parent_uid = match &source.parent_uid {
            Some(uid) => uid.clone(),
            None => self.parent_folder().await?.uid,
        };
        if source_parent_uid != dest_parent.uid {
            self.volume
                .remote()
                .move_node(&source.uid, &dest_parent.uid)
                .await
                .map_err(BridgeError::from)?;
        }
        let new_name = paths::name(&dest_path);
        if new_name != source.name {
            self.volume
                .remote()
                .rename_node(&source.uid, new_name)
                .await
                .map_err(BridgeError::from)?;
        }
        self.volume.cache().invalidate_folder(&source_parent_uid);
        self.volume.cache().invalidate_folder(&dest_parent.uid);
        debug!("moved {} to {dest_path} ({})", self.path, source.uid);
        Ok(())
    }

    /// Dead properties of this node, hydrating once from backend extension
    /// metadata if nothing is stored yet.
    pub async fn dead_props(&self) -> BridgeResult<Vec<DeadProp>> {
        let node = self.node().await?;
        if let Some(set) = self.volume.props().get(&node.uid)? {
            return Ok(set.props);
        }
        self.hydrate_props(&node.uid).await
    }

    /// PROPPATCH: apply sets and removes atomically, returning the stored
    /// property set.
    pub async fn patch_dead_props(
        &self,
        _auth: &MutationAuth,
        set: Vec<DeadProp>,
        remove: Vec<(Option<String>, String)>,
    ) -> BridgeResult<Vec<DeadProp>> {
        self.check_writable()?;
        let node = self.node().await?;
        let mut props = match self.volume.props().get(&node.uid)? {
            Some(stored) => stored.props,
            None => self.hydrate_props(&node.uid).await?,
        };
        for incoming in set {
            match props.iter_mut().find(|p| p.key() == incoming.key()) {
                Some(existing) => *existing = incoming,
                None => props.push(incoming),
            }
        }
        for (namespace, name) in &remove {
            props.retain(|p| p.key() != (namespace.as_deref(), name.as_str()));
        }
        let saved = self.volume.props().save(&node.uid, &props)?;
        Ok(saved.props)
    }

    /// One opportunistic import of backend extension metadata. On success
    /// the stored record (even an empty one) becomes authoritative and the
    /// backend is never consulted for properties again; on failure nothing
    /// is persisted so the next read retries.
    async fn hydrate_props(&self, uid: &str) -> BridgeResult<Vec<DeadProp>> {
        match self.volume.remote().node(uid).await {
            Ok(remote_node) => {
                let mut imported: Vec<DeadProp> = remote_node
                    .attributes()
                    .iter()
                    .map(|(name, value)| DeadProp {
                        name: name.clone(),
                        prefix: None,
                        namespace: Some(REMOTE_PROP_NAMESPACE.to_string()),
                        value: value.clone(),
                    })
                    .collect();
                imported.sort_by(|a, b| a.name.cmp(&b.name));
                self.volume.props().save(uid, &imported)?;
                trace!(
                    "hydrated {} propert(ies) for {} from remote metadata",
                    imported.len(),
                    self.path
                );
                Ok(imported)
            }
            Err(err) => {
                warn!("property hydration for {} failed: {err}", self.path);
                Ok(Vec::new())
            }
        }
    }

    /// Remove an existing node at this path ahead of a copy/move into it.
    /// Non-empty collections refuse displacement.
    async fn displace_existing(&self, auth: &MutationAuth) -> BridgeResult<()> {
        let existing = match self.node().await {
            Ok(node) => node,
            Err(BridgeError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        if existing.is_folder() {
            let children = self.volume.cache().folder_listing(&existing.uid).await?;
            if !children.is_empty() {
                return Err(BridgeError::Forbidden(format!(
                    "destination collection {} is not empty",
                    self.path
                )));
            }
        }
        self.delete(auth).await
    }

    fn copy_tree<'a>(
        &'a self,
        source: &'a Node,
        dest_parent_uid: &'a str,
        dest_name: &'a str,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        async move {
            if source.is_folder() {
                let new_uid = self
                    .volume
                    .remote()
                    .create_folder(dest_parent_uid, dest_name)
                    .await
                    .map_err(BridgeError::from)?;
                let children = self.volume.cache().folder_listing(&source.uid).await?;
                for child in children.iter() {
                    self.copy_tree(child, &new_uid, &child.name).await?;
                }
            } else {
                let content = self
                    .volume
                    .remote()
                    .download_file(&source.uid)
                    .await
                    .map_err(BridgeError::from)?;
                let opts = UploadOptions {
                    mime: source.mime.clone(),
                    size_hint: Some(source.size),
                    modified_at: Some(source.modified_at),
                };
                self.volume
                    .remote()
                    .upload_file(dest_parent_uid, dest_name, content, opts)
                    .await
                    .map_err(BridgeError::from)?;
            }
            Ok(())
        }
        .boxed()
    }

    fn subtree_uids(&self, node: Node) -> BoxFuture<'_, BridgeResult<Vec<String>>> {
        async move {
            let mut out = vec![node.uid.clone()];
            if node.is_folder() {
                let children = self.volume.cache().folder_listing(&node.uid).await?;
                for child in children.iter() {
                    out.extend(self.subtree_uids(child.clone()).await?);
                }
            }
            Ok(out)
        }
        .boxed()
    }

    async fn fetch_and_cache(&self, uid: &str) -> BridgeResult<Node> {
        let node = self
            .volume
            .remote()
            .node(uid)
            .await
            .map_err(BridgeError::from)?
            .to_node();
        self.volume.cache().cache_node(&self.path, node.clone());
        Ok(node)
    }
}
