//! Durable dead-property records, keyed by node identity.
//!
//! Properties are addressed by the backend's stable node uid, never by path,
//! so they survive rename and move and are discarded together with the node
//! on delete.

use crate::error::{BridgeError, BridgeResult};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// One dead property: stored verbatim, no protocol-defined meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadProp {
    pub name: String,
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    /// Raw XML fragment of the property value.
    pub value: String,
}

impl DeadProp {
    /// Identity of a property: namespace plus local name.
    pub fn key(&self) -> (Option<&str>, &str) {
        (self.namespace.as_deref(), &self.name)
    }
}

/// The stored property set of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct PropSet {
    pub props: Vec<DeadProp>,
    /// Unix milliseconds of the last write.
    pub updated_at: i64,
    /// Bumped on every save.
    pub version: i64,
}

/// Durable dead-property table.
pub struct PropStore {
    conn: Mutex<Connection>,
}

impl PropStore {
    pub fn open<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        Self::from_connection(Connection::open(path.as_ref())?)
    }

    /// Private table for tests; nothing survives the instance.
    pub fn open_in_memory() -> BridgeResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> BridgeResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                node_uid TEXT PRIMARY KEY,
                props TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                version INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metadata_updated ON metadata(updated_at)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Stored property set for a node, or `None` if it never had one saved.
    pub fn get(&self, node_uid: &str) -> BridgeResult<Option<PropSet>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, i64, i64)> = conn
            .query_row(
                "SELECT props, updated_at, version FROM metadata WHERE node_uid = ?1",
                params![node_uid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        match row {
            Some((json, updated_at, version)) => {
                let props: Vec<DeadProp> = serde_json::from_str(&json)
                    .map_err(|e| BridgeError::Store(format!("decode props: {e}")))?;
                Ok(Some(PropSet {
                    props,
                    updated_at,
                    version,
                }))
            }
            None => Ok(None),
        }
    }

    /// Upsert a node's property set, bumping the version.
    pub fn save(&self, node_uid: &str, props: &[DeadProp]) -> BridgeResult<PropSet> {
        let json = serde_json::to_string(props)
            .map_err(|e| BridgeError::Store(format!("encode props: {e}")))?;
        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let version: i64 = tx
            .query_row(
                "SELECT version FROM metadata WHERE node_uid = ?1",
                params![node_uid],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0)
            + 1;
        tx.execute(
            "INSERT OR REPLACE INTO metadata (node_uid, props, updated_at, version)
             VALUES (?1, ?2, ?3, ?4)",
            params![node_uid, json, now, version],
        )?;
        tx.commit()?;
        debug!("saved {} propert(ies) for {node_uid} (v{version})", props.len());
        Ok(PropSet {
            props: props.to_vec(),
            updated_at: now,
            version,
        })
    }

    /// Remove a node's property set; `true` if one existed.
    pub fn delete(&self, node_uid: &str) -> BridgeResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM metadata WHERE node_uid = ?1", params![node_uid])?;
        Ok(removed > 0)
    }
}
