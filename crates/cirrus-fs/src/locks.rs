//! Durable lock records and conflict/expiry logic.
//!
//! Locks live in a sqlite table so a freshly started process answers LOCK
//! queries correctly. Expired records are purged lazily before every read;
//! the conflict check and the insert of `create_lock` run inside one
//! transaction under the connection mutex, so two concurrent LOCK requests
//! on the same path cannot both succeed.

use crate::error::{BridgeError, BridgeResult};
use crate::paths;
use log::{debug, warn};
use rusqlite::{params, Connection, Row, Transaction};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Prefix of every issued lock token.
pub const TOKEN_PREFIX: &str = "opaquelocktoken:";

const LOCK_COLUMNS: &str =
    "token, path, principal, created_at, expires_at, timeout, scope, depth, provisional, owner";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

impl LockScope {
    fn as_str(self) -> &'static str {
        match self {
            LockScope::Exclusive => "exclusive",
            LockScope::Shared => "shared",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "shared" => LockScope::Shared,
            "exclusive" => LockScope::Exclusive,
            other => {
                warn!("unknown lock scope {other:?} in store, treating as exclusive");
                LockScope::Exclusive
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    Zero,
    Infinity,
}

impl LockDepth {
    fn as_str(self) -> &'static str {
        match self {
            LockDepth::Zero => "0",
            LockDepth::Infinity => "infinity",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "infinity" => LockDepth::Infinity,
            "0" => LockDepth::Zero,
            other => {
                warn!("unknown lock depth {other:?} in store, treating as 0");
                LockDepth::Zero
            }
        }
    }
}

/// An active lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRecord {
    pub token: String,
    pub path: String,
    pub principal: String,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub expires_at: i64,
    pub timeout_secs: u32,
    pub scope: LockScope,
    pub depth: LockDepth,
    pub provisional: bool,
    /// Verbatim owner XML from the LOCK body, if any.
    pub owner: Option<String>,
}

impl LockRecord {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at < now_ms
    }

    /// Whole seconds until expiry, never negative.
    pub fn seconds_remaining(&self, now_ms: i64) -> u64 {
        ((self.expires_at - now_ms).max(0) / 1000) as u64
    }

    /// Whether this lock applies to `path`: exact match, or an ancestor lock
    /// with depth infinity covering the whole subtree.
    pub fn covers(&self, path: &str) -> bool {
        self.path == path
            || (self.depth == LockDepth::Infinity && paths::contains(&self.path, path))
    }
}

/// Parameters for [`LockStore::create_lock`].
#[derive(Debug, Clone)]
pub struct LockRequest<'a> {
    pub path: &'a str,
    pub principal: &'a str,
    pub timeout_secs: u32,
    pub scope: LockScope,
    pub depth: LockDepth,
    pub provisional: bool,
    pub owner: Option<&'a str>,
}

/// Failure modes of lock creation.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another lock already applies to the requested path.
    #[error("conflicting lock {} held on {}", .0.token, .0.path)]
    Conflict(Box<LockRecord>),

    #[error(transparent)]
    Store(#[from] BridgeError),
}

/// Durable lock table.
pub struct LockStore {
    conn: Mutex<Connection>,
}

impl LockStore {
    pub fn open<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        Self::from_connection(Connection::open(path.as_ref())?)
    }

    /// Private table for tests; nothing survives the instance.
    pub fn open_in_memory() -> BridgeResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> BridgeResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS locks (
                token TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                principal TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                timeout INTEGER NOT NULL,
                scope TEXT NOT NULL,
                depth TEXT NOT NULL,
                provisional INTEGER NOT NULL DEFAULT 0,
                owner TEXT
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_locks_path ON locks(path)", [])?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_locks_expires ON locks(expires_at)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a lock, failing if any other lock already applies to the path.
    ///
    /// The conflict set is: locks exactly at the path, locks on a descendant
    /// when the request asks for depth infinity, and locks on any ancestor
    /// that itself has depth infinity.
    pub fn create_lock(&self, req: &LockRequest<'_>) -> Result<LockRecord, LockError> {
        let path = paths::normalize(req.path)?;
        let now = now_ms();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(BridgeError::from)?;
        purge_expired_in(&tx, now)?;
        if let Some(conflict) = first_conflict(&tx, &path, req.depth)? {
            return Err(LockError::Conflict(Box::new(conflict)));
        }
        let record = LockRecord {
            token: fresh_token(),
            path,
            principal: req.principal.to_string(),
            created_at: now,
            expires_at: now + i64::from(req.timeout_secs) * 1000,
            timeout_secs: req.timeout_secs,
            scope: req.scope,
            depth: req.depth,
            provisional: req.provisional,
            owner: req.owner.map(str::to_string),
        };
        tx.execute(
            &format!("INSERT INTO locks ({LOCK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                record.token,
                record.path,
                record.principal,
                record.created_at,
                record.expires_at,
                record.timeout_secs,
                record.scope.as_str(),
                record.depth.as_str(),
                record.provisional,
                record.owner,
            ],
        )
        .map_err(BridgeError::from)?;
        tx.commit().map_err(BridgeError::from)?;
        debug!(
            "lock {} created on {} for {} ({}s, depth {})",
            record.token,
            record.path,
            record.principal,
            record.timeout_secs,
            record.depth.as_str()
        );
        Ok(record)
    }

    /// Look up a lock by its exact token.
    pub fn get_lock(&self, token: &str) -> BridgeResult<Option<LockRecord>> {
        let conn = self.conn.lock().unwrap();
        purge_expired_in(&conn, now_ms())?;
        select_by_token(&conn, token)
    }

    /// Locks recorded exactly at this path.
    pub fn locks_at_path(&self, path: &str) -> BridgeResult<Vec<LockRecord>> {
        let path = paths::normalize(path)?;
        let conn = self.conn.lock().unwrap();
        purge_expired_in(&conn, now_ms())?;
        select_records(
            &conn,
            &format!("SELECT {LOCK_COLUMNS} FROM locks WHERE path = ?1"),
            params![path],
        )
    }

    /// Locks applying to this path: exact matches plus ancestor locks with
    /// depth infinity.
    pub fn locks_covering(&self, path: &str) -> BridgeResult<Vec<LockRecord>> {
        let path = paths::normalize(path)?;
        let conn = self.conn.lock().unwrap();
        purge_expired_in(&conn, now_ms())?;
        covering_in(&conn, &path)
    }

    /// Locks recorded strictly below this path.
    pub fn locks_below(&self, path: &str) -> BridgeResult<Vec<LockRecord>> {
        let path = paths::normalize(path)?;
        let conn = self.conn.lock().unwrap();
        purge_expired_in(&conn, now_ms())?;
        below_in(&conn, &path)
    }

    pub fn locks_for_user(&self, principal: &str) -> BridgeResult<Vec<LockRecord>> {
        let conn = self.conn.lock().unwrap();
        purge_expired_in(&conn, now_ms())?;
        select_records(
            &conn,
            &format!("SELECT {LOCK_COLUMNS} FROM locks WHERE principal = ?1"),
            params![principal],
        )
    }

    pub fn all_locks(&self) -> BridgeResult<Vec<LockRecord>> {
        let conn = self.conn.lock().unwrap();
        purge_expired_in(&conn, now_ms())?;
        select_records(
            &conn,
            &format!("SELECT {LOCK_COLUMNS} FROM locks ORDER BY created_at"),
            params![],
        )
    }

    /// Extend a lock's life; `None` if the token is unknown or expired.
    pub fn refresh_lock(&self, token: &str, timeout_secs: u32) -> BridgeResult<Option<LockRecord>> {
        let token = normalize_token(token);
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        purge_expired_in(&conn, now)?;
        let changed = conn.execute(
            "UPDATE locks SET expires_at = ?1, timeout = ?2 WHERE token = ?3",
            params![now + i64::from(timeout_secs) * 1000, timeout_secs, token],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        select_by_token(&conn, token)
    }

    /// Remove a lock by token; `true` if one was removed.
    pub fn delete_lock(&self, token: &str) -> BridgeResult<bool> {
        let token = normalize_token(token);
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM locks WHERE token = ?1", params![token])?;
        Ok(removed > 0)
    }

    /// Remove every lock recorded exactly at this path, returning the count.
    /// Used on resource delete/move so a stale token cannot replay against a
    /// path it no longer describes.
    pub fn delete_locks_for_path(&self, path: &str) -> BridgeResult<usize> {
        let path = paths::normalize(path)?;
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM locks WHERE path = ?1", params![path])?;
        if removed > 0 {
            debug!("purged {removed} lock(s) at {path}");
        }
        Ok(removed)
    }

    /// Whether a presented token authorizes operations on this path.
    /// Accepts the angle-bracketed wire form.
    pub fn validate_token(&self, path: &str, token: &str) -> BridgeResult<bool> {
        let path = paths::normalize(path)?;
        let token = normalize_token(token);
        let conn = self.conn.lock().unwrap();
        purge_expired_in(&conn, now_ms())?;
        match select_by_token(&conn, token)? {
            Some(record) => Ok(record.covers(&path)),
            None => Ok(false),
        }
    }

    /// Whether any lock applies to this path, optionally ignoring one token.
    pub fn is_locked(&self, path: &str, ignore_token: Option<&str>) -> BridgeResult<bool> {
        let path = paths::normalize(path)?;
        let ignored = ignore_token.map(normalize_token);
        let conn = self.conn.lock().unwrap();
        purge_expired_in(&conn, now_ms())?;
        let covering = covering_in(&conn, &path)?;
        Ok(covering
            .iter()
            .any(|l| Some(l.token.as_str()) != ignored))
    }

    /// Mutation authorization policy.
    ///
    /// A supplied token must validate for the path. With no token, every
    /// applicable lock must belong to the requesting principal: a lock
    /// owner may operate without re-presenting the token.
    pub fn check_access(
        &self,
        path: &str,
        principal: Option<&str>,
        token: Option<&str>,
    ) -> BridgeResult<()> {
        let path = paths::normalize(path)?;
        match token {
            Some(token) => {
                if self.validate_token(&path, token)? {
                    Ok(())
                } else {
                    Err(BridgeError::Locked(format!(
                        "token does not authorize {path}"
                    )))
                }
            }
            None => {
                let covering = self.locks_covering(&path)?;
                let authorized = match principal {
                    Some(principal) => covering.iter().all(|l| l.principal == principal),
                    None => covering.is_empty(),
                };
                if authorized {
                    Ok(())
                } else {
                    Err(BridgeError::Locked(format!("{path} is locked")))
                }
            }
        }
    }

    /// Drop every expired record now instead of waiting for the next read.
    pub fn purge_expired(&self) -> BridgeResult<usize> {
        let conn = self.conn.lock().unwrap();
        purge_expired_in(&conn, now_ms())
    }
}

/// Strip the angle-bracket wire syntax from a token.
pub fn normalize_token(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed)
}

fn fresh_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{TOKEN_PREFIX}{}", hex::encode(bytes))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn purge_expired_in(conn: &Connection, now: i64) -> BridgeResult<usize> {
    let removed = conn.execute("DELETE FROM locks WHERE expires_at < ?1", params![now])?;
    if removed > 0 {
        debug!("expired {removed} lock(s)");
    }
    Ok(removed)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<LockRecord> {
    Ok(LockRecord {
        token: row.get(0)?,
        path: row.get(1)?,
        principal: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        timeout_secs: row.get(5)?,
        scope: LockScope::from_str(&row.get::<_, String>(6)?),
        depth: LockDepth::from_str(&row.get::<_, String>(7)?),
        provisional: row.get(8)?,
        owner: row.get(9)?,
    })
}

fn select_records(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> BridgeResult<Vec<LockRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, record_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn select_by_token(conn: &Connection, token: &str) -> BridgeResult<Option<LockRecord>> {
    let mut records = select_records(
        conn,
        &format!("SELECT {LOCK_COLUMNS} FROM locks WHERE token = ?1"),
        params![token],
    )?;
    Ok(records.pop())
}

fn covering_in(conn: &Connection, path: &str) -> BridgeResult<Vec<LockRecord>> {
    let mut out = select_records(
        conn,
        &format!("SELECT {LOCK_COLUMNS} FROM locks WHERE path = ?1"),
        params![path],
    )?;
    for ancestor in paths::ancestors(path) {
        out.extend(select_records(
            conn,
            &format!("SELECT {LOCK_COLUMNS} FROM locks WHERE path = ?1 AND depth = 'infinity'"),
            params![ancestor],
        )?);
    }
    Ok(out)
}

fn below_in(conn: &Connection, path: &str) -> BridgeResult<Vec<LockRecord>> {
    let prefix = if paths::is_root(path) {
        "/".to_string()
    } else {
        format!("{path}/")
    };
    select_records(
        conn,
        &format!(
            "SELECT {LOCK_COLUMNS} FROM locks
             WHERE substr(path, 1, length(?1)) = ?1 AND path <> ?2"
        ),
        params![prefix, path],
    )
}

fn first_conflict(
    tx: &Transaction<'_>,
    path: &str,
    depth: LockDepth,
) -> Result<Option<LockRecord>, LockError> {
    let mut conflicts = covering_in(tx, path)?;
    if depth == LockDepth::Infinity {
        conflicts.extend(below_in(tx, path)?);
    }
    Ok(conflicts.into_iter().next())
}
