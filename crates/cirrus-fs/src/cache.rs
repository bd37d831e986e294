//! Path and listing cache over the remote client.
//!
//! Pure caching and deduplication: path-to-node bindings under a TTL, folder
//! listings keyed by folder uid, and a single-flight table so N concurrent
//! listing requests for one folder produce exactly one backend call. No verb
//! policy lives here.

use crate::error::{BridgeError, BridgeResult};
use crate::paths;
use cirrus_remote::{Node, RemoteClient};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Immutable snapshot of a folder's children.
pub type Listing = Arc<Vec<Node>>;

type ListingFuture = Shared<BoxFuture<'static, BridgeResult<Listing>>>;

struct TimedEntry<T> {
    value: T,
    cached_at: Instant,
}

impl<T: Clone> TimedEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
        }
    }

    fn fresh(&self, ttl: Duration) -> Option<T> {
        if self.cached_at.elapsed() < ttl {
            Some(self.value.clone())
        } else {
            None
        }
    }
}

struct CacheInner {
    remote: Arc<dyn RemoteClient>,
    root: Node,
    /// `None` disables caching (and coalescing) entirely.
    ttl: Option<Duration>,
    paths: Mutex<HashMap<String, TimedEntry<Node>>>,
    folders: Mutex<HashMap<String, TimedEntry<Listing>>>,
    in_flight: Mutex<HashMap<String, ListingFuture>>,
    /// Bumped on every invalidation; a fetch started under an older epoch
    /// must not store its result.
    epoch: AtomicU64,
}

/// Path-to-node and folder-listing cache with request coalescing.
#[derive(Clone)]
pub struct NodeCache {
    inner: Arc<CacheInner>,
}

impl NodeCache {
    pub fn new(remote: Arc<dyn RemoteClient>, root: Node, ttl: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                remote,
                root,
                ttl,
                paths: Mutex::new(HashMap::new()),
                folders: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// The mount's root node. Always resolves without a backend call.
    pub fn root(&self) -> &Node {
        &self.inner.root
    }

    /// Resolve a path to its node.
    ///
    /// Order of attack: fresh cache entry, then the backend's direct
    /// path-to-identity lookup, and if that capability errors, an iterative
    /// per-segment walk over (possibly cached) folder listings, so a backend
    /// outage degrades to slower resolution, not failure.
    pub async fn resolve(&self, path: &str) -> BridgeResult<Node> {
        let path = paths::normalize(path)?;
        if paths::is_root(&path) {
            return Ok(self.inner.root.clone());
        }
        if let Some(node) = self.cached_node(&path) {
            trace!("resolve({path}): cache hit");
            return Ok(node);
        }
        match self.inner.remote.resolve_path(&path).await {
            Ok(Some(uid)) => {
                let node = self.inner.remote.node(&uid).await.map_err(BridgeError::from)?;
                let node = node.to_node();
                self.cache_node(&path, node.clone());
                Ok(node)
            }
            Ok(None) => Err(BridgeError::NotFound(path)),
            Err(err) => {
                debug!("resolve({path}): direct lookup unavailable ({err}), walking listings");
                self.resolve_by_walk(&path).await
            }
        }
    }

    async fn resolve_by_walk(&self, path: &str) -> BridgeResult<Node> {
        let mut current = self.inner.root.clone();
        let mut current_path = String::from("/");
        for segment in paths::segments(path) {
            if !current.is_folder() {
                return Err(BridgeError::NotFound(path.to_string()));
            }
            let listing = self.folder_listing(&current.uid).await?;
            let child = listing
                .iter()
                .find(|n| n.name == segment)
                .cloned()
                .ok_or_else(|| BridgeError::NotFound(path.to_string()))?;
            current_path = paths::join(&current_path, segment);
            self.cache_node(&current_path, child.clone());
            current = child;
        }
        Ok(current)
    }

    /// Unconditional upsert of a path binding with the current timestamp.
    pub fn cache_node(&self, path: &str, node: Node) {
        if self.inner.ttl.is_none() {
            return;
        }
        self.inner
            .paths
            .lock()
            .unwrap()
            .insert(path.to_string(), TimedEntry::new(node));
    }

    fn cached_node(&self, path: &str) -> Option<Node> {
        let ttl = self.inner.ttl?;
        let mut paths = self.inner.paths.lock().unwrap();
        match paths.get(path).and_then(|e| e.fresh(ttl)) {
            Some(node) => Some(node),
            None => {
                paths.remove(path);
                None
            }
        }
    }

    /// Children of a folder, cache-or-fetch with request coalescing.
    ///
    /// Concurrent callers for one uid share a single backend call and all
    /// observe its outcome, success or failure; the in-flight entry is
    /// removed unconditionally once the fetch settles, so the next caller
    /// after a failure retries fresh. A failure is never stored as a result.
    pub async fn folder_listing(&self, uid: &str) -> BridgeResult<Listing> {
        let Some(ttl) = self.inner.ttl else {
            return fetch_listing(&self.inner, uid).await;
        };
        {
            let mut folders = self.inner.folders.lock().unwrap();
            if let Some(listing) = folders.get(uid).and_then(|e| e.fresh(ttl)) {
                trace!("folder_listing({uid}): cache hit");
                return Ok(listing);
            }
            folders.remove(uid);
        }

        let fut = {
            let mut in_flight = self.inner.in_flight.lock().unwrap();
            if let Some(fut) = in_flight.get(uid) {
                trace!("folder_listing({uid}): joining in-flight fetch");
                fut.clone()
            } else {
                let inner = self.inner.clone();
                let uid_owned = uid.to_string();
                let epoch = inner.epoch.load(Ordering::SeqCst);
                let fut: ListingFuture = async move {
                    let result = fetch_listing(&inner, &uid_owned).await;
                    if let Ok(listing) = &result {
                        // A listing fetched before an invalidation must not
                        // resurrect the pre-mutation view afterwards.
                        if inner.epoch.load(Ordering::SeqCst) == epoch {
                            inner
                                .folders
                                .lock()
                                .unwrap()
                                .insert(uid_owned.clone(), TimedEntry::new(listing.clone()));
                        }
                    }
                    inner.in_flight.lock().unwrap().remove(&uid_owned);
                    result
                }
                .boxed()
                .shared();
                in_flight.insert(uid.to_string(), fut.clone());
                fut
            }
        };
        fut.await
    }

    /// Drop a folder's listing. The path cache does not track containment,
    /// so it is cleared wholesale; correctness is bought at the price of
    /// hit rate.
    pub fn invalidate_folder(&self, uid: &str) {
        debug!("invalidate_folder({uid})");
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.folders.lock().unwrap().remove(uid);
        self.inner.paths.lock().unwrap().clear();
    }

    /// Drop everything (logout/reset).
    pub fn clear(&self) {
        debug!("cache cleared");
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.paths.lock().unwrap().clear();
        self.inner.folders.lock().unwrap().clear();
    }
}

async fn fetch_listing(inner: &Arc<CacheInner>, uid: &str) -> BridgeResult<Listing> {
    let children = inner
        .remote
        .list_folder(uid)
        .await
        .map_err(BridgeError::from)?;
    Ok(Arc::new(children.iter().map(|c| c.to_node()).collect()))
}
