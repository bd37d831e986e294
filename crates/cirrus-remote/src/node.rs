//! Canonical node model and the raw backend node shape it is projected from.

use std::collections::HashMap;

/// Whether a node is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Folder,
}

impl NodeKind {
    pub fn is_folder(self) -> bool {
        matches!(self, NodeKind::Folder)
    }
}

/// Snapshot of a backend file or folder at resolution time.
///
/// The `uid` is the backend's stable, path-independent identity: it survives
/// rename and move. Nodes are never persisted locally; they are re-fetched or
/// served from the in-memory cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub uid: String,
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
    pub mime: Option<String>,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub modified_at: i64,
    pub parent_uid: Option<String>,
}

impl Node {
    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    /// The root of a mount: a folder with an empty display name and no parent.
    pub fn root(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: String::new(),
            kind: NodeKind::Folder,
            size: 0,
            mime: None,
            created_at: 0,
            modified_at: 0,
            parent_uid: None,
        }
    }
}

/// Fully resolved node details as returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDetails {
    pub uid: String,
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
    pub mime: Option<String>,
    pub created_at: i64,
    pub modified_at: i64,
    pub parent_uid: Option<String>,
    /// Backend extension metadata, passed through verbatim.
    pub attributes: HashMap<String, String>,
}

/// A node the backend could only partially decode; absent fields carry an
/// entry in the accompanying error list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DegradedNode {
    pub uid: String,
    pub name: Option<String>,
    pub kind: Option<NodeKind>,
    pub size: Option<u64>,
    pub mime: Option<String>,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub parent_uid: Option<String>,
    pub attributes: HashMap<String, String>,
}

/// Why a single field of a degraded node is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Raw node shape crossing the backend boundary: either fully resolved or
/// degraded with per-field errors. Everything past the boundary works on the
/// canonical [`Node`] produced by [`RemoteNode::to_node`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteNode {
    Resolved(NodeDetails),
    Degraded {
        partial: DegradedNode,
        errors: Vec<FieldError>,
    },
}

impl RemoteNode {
    pub fn uid(&self) -> &str {
        match self {
            RemoteNode::Resolved(details) => &details.uid,
            RemoteNode::Degraded { partial, .. } => &partial.uid,
        }
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        match self {
            RemoteNode::Resolved(details) => &details.attributes,
            RemoteNode::Degraded { partial, .. } => &partial.attributes,
        }
    }

    /// Pure projection into the canonical node type.
    ///
    /// Degraded fields fall back to neutral values: the uid stands in for a
    /// missing name, missing sizes and timestamps become zero, and an unknown
    /// kind is treated as a file so no caller ever descends into it.
    pub fn to_node(&self) -> Node {
        match self {
            RemoteNode::Resolved(details) => Node {
                uid: details.uid.clone(),
                name: details.name.clone(),
                kind: details.kind,
                size: details.size,
                mime: details.mime.clone(),
                created_at: details.created_at,
                modified_at: details.modified_at,
                parent_uid: details.parent_uid.clone(),
            },
            RemoteNode::Degraded { partial, .. } => Node {
                uid: partial.uid.clone(),
                name: partial.name.clone().unwrap_or_else(|| partial.uid.clone()),
                kind: partial.kind.unwrap_or(NodeKind::File),
                size: partial.size.unwrap_or(0),
                mime: partial.mime.clone(),
                created_at: partial.created_at.unwrap_or(0),
                modified_at: partial.modified_at.unwrap_or(0),
                parent_uid: partial.parent_uid.clone(),
            },
        }
    }
}

impl From<NodeDetails> for RemoteNode {
    fn from(details: NodeDetails) -> Self {
        RemoteNode::Resolved(details)
    }
}
