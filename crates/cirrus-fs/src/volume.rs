//! Composition root for one served volume.

use crate::cache::NodeCache;
use crate::config::MountConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::locks::LockStore;
use crate::props::PropStore;
use crate::resource::Resource;
use cirrus_remote::{Node, RemoteClient};
use log::info;
use std::fs;
use std::sync::Arc;

/// Everything one mount owns: the remote client, the in-memory node cache,
/// and the two durable stores. Instances are explicit and injected: tests
/// build volumes around in-memory stores, the server around on-disk ones.
pub struct Volume {
    remote: Arc<dyn RemoteClient>,
    cache: NodeCache,
    locks: Arc<LockStore>,
    props: Arc<PropStore>,
    config: MountConfig,
}

impl Volume {
    /// Open a volume with on-disk lock/property tables under the configured
    /// state directory.
    pub async fn open(
        remote: Arc<dyn RemoteClient>,
        config: MountConfig,
    ) -> BridgeResult<Arc<Self>> {
        fs::create_dir_all(&config.state_dir)
            .map_err(|e| BridgeError::Store(format!("create state dir: {e}")))?;
        let locks = Arc::new(LockStore::open(config.locks_db_path())?);
        let props = Arc::new(PropStore::open(config.props_db_path())?);
        Self::with_stores(remote, config, locks, props).await
    }

    /// Open a volume around caller-provided stores.
    pub async fn with_stores(
        remote: Arc<dyn RemoteClient>,
        config: MountConfig,
        locks: Arc<LockStore>,
        props: Arc<PropStore>,
    ) -> BridgeResult<Arc<Self>> {
        let root_uid = remote.root_uid().await.map_err(BridgeError::from)?;
        let root = Node::root(root_uid);
        let cache = NodeCache::new(remote.clone(), root, config.cache_ttl());
        info!(
            "volume opened (root {}, ttl {:?}, read_only {})",
            cache.root().uid,
            config.cache_ttl(),
            config.read_only
        );
        Ok(Arc::new(Self {
            remote,
            cache,
            locks,
            props,
            config,
        }))
    }

    /// Orchestrator for one requested path.
    pub fn resource(self: &Arc<Self>, path: &str) -> BridgeResult<Resource> {
        Resource::new(self.clone(), path)
    }

    pub fn remote(&self) -> &Arc<dyn RemoteClient> {
        &self.remote
    }

    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    pub fn locks(&self) -> &Arc<LockStore> {
        &self.locks
    }

    pub fn props(&self) -> &Arc<PropStore> {
        &self.props
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Drop all cached state (logout/reset). Durable stores are untouched.
    pub fn reset(&self) {
        self.cache.clear();
    }
}
