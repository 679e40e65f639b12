use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::{FsError, Result};
use crate::path::{is_within, name_of, parent_of};
use crate::repository::{Node, NodeType, PropertyValue, Session};

#[derive(Debug, Clone)]
struct StoredNode {
    id: Uuid,
    node_type: NodeType,
    properties: HashMap<String, PropertyValue>,
}

impl StoredNode {
    fn new(node_type: NodeType) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_type,
            properties: HashMap::new(),
        }
    }
}

/// In-process session backend.
///
/// Holds the persisted workspace and the session's transient view as two
/// ordered path maps; `save()` promotes the transient view, `refresh(false)`
/// drops it.
pub struct MemorySession {
    saved: RwLock<BTreeMap<String, StoredNode>>,
    live: RwLock<BTreeMap<String, StoredNode>>,
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let live = self.live.read().unwrap();
        f.debug_struct("MemorySession")
            .field("nodes", &live.len())
            .finish()
    }
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), StoredNode::new(NodeType::Folder));
        Self {
            saved: RwLock::new(nodes.clone()),
            live: RwLock::new(nodes),
        }
    }

    fn to_node(path: &str, stored: &StoredNode) -> Node {
        Node {
            id: stored.id,
            path: path.to_string(),
            node_type: stored.node_type,
            properties: stored.properties.clone(),
        }
    }
}

/// Whether a child of `child_type` may be created under a `parent_type` node.
fn can_hold(parent_type: NodeType, child_type: NodeType) -> bool {
    match parent_type {
        NodeType::Folder => matches!(child_type, NodeType::Folder | NodeType::File),
        NodeType::File => child_type == NodeType::Resource,
        NodeType::Resource => false,
    }
}

fn check_abs(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(FsError::InvalidPath(format!(
            "node path must be absolute: {}",
            path
        )));
    }
    Ok(())
}

/// Validate a subtree relocation target against the live map.
fn check_subtree_target(
    live: &BTreeMap<String, StoredNode>,
    from: &str,
    to: &str,
    source_type: NodeType,
) -> Result<()> {
    if live.contains_key(to) {
        return Err(FsError::AlreadyExists(to.to_string()));
    }
    if is_within(from, to) {
        return Err(FsError::InvalidOperation(format!(
            "cannot place {} inside its own subtree {}",
            to, from
        )));
    }
    let parent = parent_of(to);
    let parent_node = live
        .get(parent)
        .ok_or_else(|| FsError::NotFound(parent.to_string()))?;
    if !can_hold(parent_node.node_type, source_type) {
        return Err(FsError::InvalidOperation(format!(
            "{} node {} cannot hold a {} child",
            parent_node.node_type, parent, source_type
        )));
    }
    Ok(())
}

#[async_trait]
impl Session for MemorySession {
    async fn node(&self, path: &str) -> Result<Node> {
        check_abs(path)?;
        let live = self.live.read().unwrap();
        live.get(path)
            .map(|stored| Self::to_node(path, stored))
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    async fn node_exists(&self, path: &str) -> Result<bool> {
        check_abs(path)?;
        Ok(self.live.read().unwrap().contains_key(path))
    }

    async fn create_node(&self, path: &str, node_type: NodeType) -> Result<Node> {
        check_abs(path)?;
        if path == "/" {
            return Err(FsError::AlreadyExists("/".to_string()));
        }
        let mut live = self.live.write().unwrap();
        if live.contains_key(path) {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let parent = parent_of(path);
        let parent_node = live
            .get(parent)
            .ok_or_else(|| FsError::NotFound(parent.to_string()))?;
        if !can_hold(parent_node.node_type, node_type) {
            return Err(FsError::InvalidOperation(format!(
                "{} node {} cannot hold a {} child",
                parent_node.node_type, parent, node_type
            )));
        }

        let stored = StoredNode::new(node_type);
        let node = Self::to_node(path, &stored);
        live.insert(path.to_string(), stored);
        debug!("create_node: {} ({})", path, node_type);
        Ok(node)
    }

    async fn set_property(&self, path: &str, name: &str, value: PropertyValue) -> Result<()> {
        check_abs(path)?;
        let mut live = self.live.write().unwrap();
        let stored = live
            .get_mut(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        stored.properties.insert(name.to_string(), value);
        Ok(())
    }

    async fn child_names(&self, path: &str) -> Result<Vec<String>> {
        check_abs(path)?;
        let live = self.live.read().unwrap();
        if !live.contains_key(path) {
            return Err(FsError::NotFound(path.to_string()));
        }
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let names = live
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| key.as_str() != path && !key[prefix.len()..].contains('/'))
            .map(|(key, _)| name_of(key).to_string())
            .collect();
        Ok(names)
    }

    async fn move_node(&self, from: &str, to: &str) -> Result<()> {
        check_abs(from)?;
        check_abs(to)?;
        if from == "/" {
            return Err(FsError::InvalidOperation("cannot move the root".to_string()));
        }
        let mut live = self.live.write().unwrap();
        let source = live
            .get(from)
            .ok_or_else(|| FsError::NotFound(from.to_string()))?;
        check_subtree_target(&live, from, to, source.node_type)?;

        let keys: Vec<String> = live
            .keys()
            .filter(|key| is_within(from, key))
            .cloned()
            .collect();
        for key in keys {
            let stored = live.remove(&key).unwrap();
            let new_key = format!("{}{}", to, &key[from.len()..]);
            live.insert(new_key, stored);
        }
        debug!("move_node: {} -> {}", from, to);
        Ok(())
    }

    async fn copy_node(&self, from: &str, to: &str) -> Result<()> {
        check_abs(from)?;
        check_abs(to)?;
        let mut live = self.live.write().unwrap();
        let source = live
            .get(from)
            .ok_or_else(|| FsError::NotFound(from.to_string()))?;
        check_subtree_target(&live, from, to, source.node_type)?;

        let copies: Vec<(String, StoredNode)> = live
            .iter()
            .filter(|(key, _)| is_within(from, key))
            .map(|(key, stored)| {
                let mut copy = stored.clone();
                copy.id = Uuid::new_v4();
                (format!("{}{}", to, &key[from.len()..]), copy)
            })
            .collect();
        for (key, stored) in copies {
            live.insert(key, stored);
        }
        debug!("copy_node: {} -> {}", from, to);
        Ok(())
    }

    async fn remove_node(&self, path: &str) -> Result<()> {
        check_abs(path)?;
        if path == "/" {
            return Err(FsError::InvalidOperation(
                "cannot remove the root".to_string(),
            ));
        }
        let mut live = self.live.write().unwrap();
        if !live.contains_key(path) {
            return Err(FsError::NotFound(path.to_string()));
        }
        live.retain(|key, _| !is_within(path, key));
        debug!("remove_node: {}", path);
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let live = self.live.read().unwrap();
        let mut saved = self.saved.write().unwrap();
        *saved = live.clone();
        debug!("save: {} nodes persisted", saved.len());
        Ok(())
    }

    async fn refresh(&self, keep_changes: bool) -> Result<()> {
        if keep_changes {
            return Ok(());
        }
        let mut live = self.live.write().unwrap();
        let saved = self.saved.read().unwrap();
        *live = saved.clone();
        debug!("refresh: transient changes discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_fetch() {
        let session = MemorySession::new();
        session.create_node("/docs", NodeType::Folder).await.unwrap();
        session.create_node("/docs/a.txt", NodeType::File).await.unwrap();

        let node = session.node("/docs/a.txt").await.unwrap();
        assert_eq!(node.node_type, NodeType::File);
        assert_eq!(node.name(), "a.txt");
        assert!(session.node_exists("/docs").await.unwrap());
        assert!(!session.node_exists("/other").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let session = MemorySession::new();
        let err = session
            .create_node("/missing/a.txt", NodeType::File)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resource_only_under_file() {
        let session = MemorySession::new();
        session.create_node("/f.txt", NodeType::File).await.unwrap();
        session
            .create_node("/f.txt/jcr:content", NodeType::Resource)
            .await
            .unwrap();

        let err = session
            .create_node("/res", NodeType::Resource)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidOperation(_)));

        // files cannot hold folders either
        let err = session
            .create_node("/f.txt/sub", NodeType::Folder)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_child_names_sorted() {
        let session = MemorySession::new();
        session.create_node("/b", NodeType::Folder).await.unwrap();
        session.create_node("/a", NodeType::Folder).await.unwrap();
        session.create_node("/a/x", NodeType::Folder).await.unwrap();

        assert_eq!(session.child_names("/").await.unwrap(), vec!["a", "b"]);
        assert_eq!(session.child_names("/a").await.unwrap(), vec!["x"]);
        assert!(session.child_names("/missing").await.is_err());
    }

    #[tokio::test]
    async fn test_move_subtree() {
        let session = MemorySession::new();
        session.create_node("/src", NodeType::Folder).await.unwrap();
        session.create_node("/src/f.txt", NodeType::File).await.unwrap();
        session.create_node("/dst", NodeType::Folder).await.unwrap();

        session.move_node("/src", "/dst/src").await.unwrap();
        assert!(!session.node_exists("/src").await.unwrap());
        assert!(session.node_exists("/dst/src/f.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_move_into_own_subtree_rejected() {
        let session = MemorySession::new();
        session.create_node("/a", NodeType::Folder).await.unwrap();
        session.create_node("/a/b", NodeType::Folder).await.unwrap();
        let err = session.move_node("/a", "/a/b/a").await.unwrap_err();
        assert!(matches!(err, FsError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_copy_assigns_new_ids() {
        let session = MemorySession::new();
        session.create_node("/a", NodeType::Folder).await.unwrap();
        session.copy_node("/a", "/b").await.unwrap();

        let a = session.node("/a").await.unwrap();
        let b = session.node("/b").await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_save_and_refresh() {
        let session = MemorySession::new();
        session.create_node("/kept", NodeType::Folder).await.unwrap();
        session.save().await.unwrap();

        session.create_node("/dropped", NodeType::Folder).await.unwrap();
        session.refresh(false).await.unwrap();

        assert!(session.node_exists("/kept").await.unwrap());
        assert!(!session.node_exists("/dropped").await.unwrap());
    }

    #[tokio::test]
    async fn test_root_is_protected() {
        let session = MemorySession::new();
        assert!(session.remove_node("/").await.is_err());
        assert!(session.move_node("/", "/x").await.is_err());
    }
}
