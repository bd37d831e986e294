//! `DavLockSystem` implementation over the durable [`LockStore`].
//!
//! The engine parses LOCK/UNLOCK bodies and `If:` headers and calls in here;
//! conflict, expiry and ownership policy all live in the store.

use super::dav_to_path;
use crate::config::MountConfig;
use crate::locks::{
    normalize_token, LockDepth, LockError, LockRecord, LockRequest, LockScope, LockStore,
};
use dav_server::davpath::DavPath;
use dav_server::ls::{DavLock, DavLockSystem, LsFuture};
use log::{debug, error};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use xmltree::Element;

/// Lock system handing every decision to the durable store.
#[derive(Clone)]
pub struct StoreLockSystem {
    locks: Arc<LockStore>,
    default_timeout_secs: u32,
    max_timeout_secs: u32,
}

impl fmt::Debug for StoreLockSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLockSystem")
            .field("default_timeout_secs", &self.default_timeout_secs)
            .field("max_timeout_secs", &self.max_timeout_secs)
            .finish()
    }
}

impl StoreLockSystem {
    pub fn new(locks: Arc<LockStore>, config: &MountConfig) -> Box<Self> {
        Box::new(Self {
            locks,
            default_timeout_secs: config.default_lock_timeout_secs,
            max_timeout_secs: config.max_lock_timeout_secs,
        })
    }

    fn clamp_timeout(&self, timeout: Option<Duration>) -> u32 {
        timeout
            .map(|d| d.as_secs().min(u64::from(u32::MAX)) as u32)
            .unwrap_or(self.default_timeout_secs)
            .min(self.max_timeout_secs)
    }
}

impl DavLockSystem for StoreLockSystem {
    fn lock(
        &'_ self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> LsFuture<'_, Result<DavLock, DavLock>> {
        let target = dav_to_path(path);
        let timeout_secs = self.clamp_timeout(timeout);
        let owner_xml = owner.and_then(owner_to_string);
        let owner_cloned = owner.cloned();
        let principal = principal.map(|p| p.to_string());
        let path = path.clone();
        Box::pin(async move {
            let request = LockRequest {
                path: &target,
                principal: principal.as_deref().unwrap_or_default(),
                timeout_secs,
                scope: if shared {
                    LockScope::Shared
                } else {
                    LockScope::Exclusive
                },
                depth: if deep {
                    LockDepth::Infinity
                } else {
                    LockDepth::Zero
                },
                provisional: false,
                owner: owner_xml.as_deref(),
            };
            match self.locks.create_lock(&request) {
                Ok(record) => {
                    let mut lock = to_dav_lock(&record, &path);
                    lock.owner = owner_cloned.map(Box::new);
                    Ok(lock)
                }
                Err(LockError::Conflict(existing)) => {
                    debug!("lock on {target} denied by {}", existing.token);
                    Err(to_dav_lock(&existing, &path))
                }
                Err(LockError::Store(err)) => {
                    // A lock is never granted when the store cannot record it.
                    error!("lock store failure on {target}: {err}");
                    Err(denied_lock(&path))
                }
            }
        })
    }

    fn unlock(&'_ self, _path: &DavPath, token: &str) -> LsFuture<'_, Result<(), ()>> {
        let token = token.to_string();
        Box::pin(async move {
            match self.locks.delete_lock(&token) {
                Ok(true) => Ok(()),
                Ok(false) => Err(()),
                Err(err) => {
                    error!("unlock failed: {err}");
                    Err(())
                }
            }
        })
    }

    fn refresh(
        &'_ self,
        path: &DavPath,
        token: &str,
        timeout: Option<Duration>,
    ) -> LsFuture<'_, Result<DavLock, ()>> {
        let timeout_secs = self.clamp_timeout(timeout);
        let token = token.to_string();
        let path = path.clone();
        Box::pin(async move {
            match self.locks.refresh_lock(&token, timeout_secs) {
                Ok(Some(record)) => Ok(to_dav_lock(&record, &path)),
                Ok(None) => Err(()),
                Err(err) => {
                    error!("lock refresh failed: {err}");
                    Err(())
                }
            }
        })
    }

    fn check(
        &'_ self,
        path: &DavPath,
        principal: Option<&str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: Vec<&str>,
    ) -> LsFuture<'_, Result<(), DavLock>> {
        let target = dav_to_path(path);
        let principal = principal.map(|p| p.to_string());
        let submitted_tokens: Vec<String> =
            submitted_tokens.iter().map(|t| t.to_string()).collect();
        let path = path.clone();
        Box::pin(async move {
            let mut applicable = match self.locks.locks_covering(&target) {
                Ok(records) => records,
                Err(err) => {
                    error!("lock check failed on {target}: {err}");
                    return Err(denied_lock(&path));
                }
            };
            if deep {
                match self.locks.locks_below(&target) {
                    Ok(records) => applicable.extend(records),
                    Err(err) => {
                        error!("lock check failed below {target}: {err}");
                        return Err(denied_lock(&path));
                    }
                }
            }
            if applicable.is_empty() {
                return Ok(());
            }
            let tokens: Vec<&str> = submitted_tokens
                .iter()
                .map(|t| normalize_token(t))
                .collect();
            let unmatched: Vec<&LockRecord> = applicable
                .iter()
                .filter(|l| !tokens.contains(&l.token.as_str()))
                .collect();
            if unmatched.is_empty() {
                return Ok(());
            }
            // With no token presented, a principal may still operate on locks it
            // owns itself.
            if tokens.is_empty() && !ignore_principal {
                if let Some(principal) = principal.as_deref() {
                    if unmatched.iter().all(|l| l.principal == principal) {
                        return Ok(());
                    }
                }
            }
            Err(to_dav_lock(unmatched[0], &path))
        })
    }

    fn discover(&'_ self, path: &DavPath) -> LsFuture<'_, Vec<DavLock>> {
        let target = dav_to_path(path);
        let path = path.clone();
        Box::pin(async move {
            match self.locks.locks_covering(&target) {
                Ok(records) => records.iter().map(|r| to_dav_lock(r, &path)).collect(),
                Err(err) => {
                    error!("lock discovery failed on {target}: {err}");
                    Vec::new()
                }
            }
        })
    }

    fn delete(&'_ self, path: &DavPath) -> LsFuture<'_, Result<(), ()>> {
        let target = dav_to_path(path);
        Box::pin(async move {
            match self.locks.delete_locks_for_path(&target) {
                Ok(_) => Ok(()),
                Err(err) => {
                    error!("lock purge failed on {target}: {err}");
                    Err(())
                }
            }
        })
    }
}

fn to_dav_lock(record: &LockRecord, queried: &DavPath) -> DavLock {
    let path = DavPath::new(&record.path).unwrap_or_else(|_| queried.clone());
    DavLock {
        token: record.token.clone(),
        path: Box::new(path),
        principal: Some(record.principal.clone()).filter(|p| !p.is_empty()),
        owner: record.owner.as_deref().and_then(parse_owner).map(Box::new),
        timeout_at: Some(UNIX_EPOCH + Duration::from_millis(record.expires_at.max(0) as u64)),
        timeout: Some(Duration::from_secs(u64::from(record.timeout_secs))),
        shared: record.scope == LockScope::Shared,
        deep: record.depth == LockDepth::Infinity,
    }
}

fn denied_lock(path: &DavPath) -> DavLock {
    DavLock {
        token: String::new(),
        path: Box::new(path.clone()),
        principal: None,
        owner: None,
        timeout_at: Some(SystemTime::now()),
        timeout: None,
        shared: false,
        deep: false,
    }
}

fn owner_to_string(owner: &Element) -> Option<String> {
    let mut buf = Vec::new();
    owner.write(&mut buf).ok()?;
    String::from_utf8(buf).ok()
}

fn parse_owner(xml: &str) -> Option<Element> {
    Element::parse(xml.as_bytes()).ok()
}
