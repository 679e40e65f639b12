use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FsError, Result};

pub mod memory;
pub mod sql;

/// Name of the resource child a file node carries its content under.
pub const CONTENT_CHILD: &str = "jcr:content";

/// Binary payload property on a resource node.
pub const PROP_DATA: &str = "jcr:data";
/// Mime type property on a resource node.
pub const PROP_MIME_TYPE: &str = "jcr:mimeType";
/// Last-modified date property on a resource node.
pub const PROP_LAST_MODIFIED: &str = "jcr:lastModified";
/// Creation date property stamped on folder nodes.
pub const PROP_CREATED: &str = "jcr:created";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    #[serde(rename = "nt:folder")]
    Folder,
    #[serde(rename = "nt:file")]
    File,
    #[serde(rename = "nt:resource")]
    Resource,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Folder => "nt:folder",
            NodeType::File => "nt:file",
            NodeType::Resource => "nt:resource",
        }
    }
}

impl FromStr for NodeType {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nt:folder" => Ok(NodeType::Folder),
            "nt:file" => Ok(NodeType::File),
            "nt:resource" => Ok(NodeType::Resource),
            other => Err(FsError::Repository(format!("unknown node type: {}", other))),
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-valued node property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
    Binary(Vec<u8>),
    String(String),
    Long(i64),
    Date(DateTime<Utc>),
    Bool(bool),
}

impl PropertyValue {
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            PropertyValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

/// A node as read through a session: identifier, absolute path, type and
/// its single-valued properties.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: Uuid,
    pub path: String,
    pub node_type: NodeType,
    pub properties: HashMap<String, PropertyValue>,
}

impl Node {
    pub fn name(&self) -> &str {
        crate::path::name_of(&self.path)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn is_folder(&self) -> bool {
        self.node_type == NodeType::Folder
    }

    pub fn is_file(&self) -> bool {
        self.node_type == NodeType::File
    }
}

/// A content-repository session.
///
/// Mutations land in the session's transient space and only become durable
/// on `save()`. `refresh(false)` discards pending changes. Reads always see
/// the transient state layered over the persisted one.
#[async_trait]
pub trait Session: Send + Sync + std::fmt::Debug {
    /// Fetch the node at an absolute path.
    async fn node(&self, path: &str) -> Result<Node>;

    /// Whether a node exists at an absolute path.
    async fn node_exists(&self, path: &str) -> Result<bool>;

    /// Create a node. The parent must already exist; resource nodes go
    /// under file nodes, everything else under folders.
    async fn create_node(&self, path: &str, node_type: NodeType) -> Result<Node>;

    /// Set a single-valued property on an existing node.
    async fn set_property(&self, path: &str, name: &str, value: PropertyValue) -> Result<()>;

    /// Names of the direct children of a node, sorted.
    async fn child_names(&self, path: &str) -> Result<Vec<String>>;

    /// Move a subtree. Fails if the destination already exists.
    async fn move_node(&self, from: &str, to: &str) -> Result<()>;

    /// Copy a subtree, assigning fresh identifiers. Fails if the
    /// destination already exists.
    async fn copy_node(&self, from: &str, to: &str) -> Result<()>;

    /// Remove a node and everything underneath it. The root cannot be
    /// removed.
    async fn remove_node(&self, path: &str) -> Result<()>;

    /// Persist all transient changes atomically.
    async fn save(&self) -> Result<()>;

    /// Re-synchronize with the persisted state, keeping or discarding
    /// transient changes.
    async fn refresh(&self, keep_changes: bool) -> Result<()>;
}
