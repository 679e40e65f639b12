use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{FsError, Result};
use crate::path::{is_within, name_of, parent_of};
use crate::repository::{Node, NodeType, PropertyValue, Session};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    workspace   TEXT NOT NULL,
    path        TEXT NOT NULL,
    parent_path TEXT NOT NULL,
    name        TEXT NOT NULL,
    id          UUID NOT NULL,
    node_type   TEXT NOT NULL,
    properties  JSONB NOT NULL DEFAULT '{}'::jsonb,
    PRIMARY KEY (workspace, path)
);
CREATE INDEX IF NOT EXISTS nodes_parent_idx ON nodes (workspace, parent_path);
"#;

#[derive(Debug, Clone)]
struct StagedNode {
    id: Uuid,
    node_type: NodeType,
    properties: HashMap<String, PropertyValue>,
}

/// Transient change log: staged node states plus removed subtree roots.
/// `remove_node` drops staged entries under the removed root, so a path is
/// looked up in `upserts` first and only then checked against `removals`.
#[derive(Debug, Default)]
struct Pending {
    upserts: BTreeMap<String, StagedNode>,
    removals: Vec<String>,
}

impl Pending {
    fn is_removed(&self, path: &str) -> bool {
        self.removals.iter().any(|root| is_within(root, path))
    }
}

/// Postgres-backed session.
///
/// Nodes live in a single `nodes` table keyed by workspace and path, with
/// properties as JSONB. Mutations are staged in memory and replayed inside
/// one transaction on `save()`.
pub struct SqlSession {
    pool: PgPool,
    workspace: String,
    pending: RwLock<Pending>,
}

impl std::fmt::Debug for SqlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlSession")
            .field("workspace", &self.workspace)
            .finish()
    }
}

impl SqlSession {
    pub fn new(pool: PgPool, workspace: impl Into<String>) -> Self {
        Self {
            pool,
            workspace: workspace.into(),
            pending: RwLock::new(Pending::default()),
        }
    }

    /// Connect to Postgres and make sure the schema and the workspace root
    /// node exist.
    pub async fn connect(url: &str, workspace: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(8).connect(url).await?;
        let session = Self::new(pool, workspace);
        session.initialize().await?;
        Ok(session)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        sqlx::query(
            "INSERT INTO nodes (workspace, path, parent_path, name, id, node_type, properties)
             VALUES ($1, '/', '', '', $2, $3, '{}'::jsonb)
             ON CONFLICT (workspace, path) DO NOTHING",
        )
        .bind(&self.workspace)
        .bind(Uuid::new_v4())
        .bind(NodeType::Folder.as_str())
        .execute(&self.pool)
        .await?;
        info!("initialized workspace {}", self.workspace);
        Ok(())
    }

    fn row_to_staged(row: &PgRow) -> Result<StagedNode> {
        let node_type: String = row.try_get("node_type")?;
        let properties: serde_json::Value = row.try_get("properties")?;
        Ok(StagedNode {
            id: row.try_get("id")?,
            node_type: node_type.parse()?,
            properties: serde_json::from_value(properties)?,
        })
    }

    async fn db_get(&self, path: &str) -> Result<Option<StagedNode>> {
        let row = sqlx::query(
            "SELECT id, node_type, properties FROM nodes WHERE workspace = $1 AND path = $2",
        )
        .bind(&self.workspace)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_staged).transpose()
    }

    /// The session view of a node: staged state first, then the database.
    async fn lookup(&self, path: &str) -> Result<Option<StagedNode>> {
        check_abs(path)?;
        {
            let pending = self.pending.read().await;
            if let Some(staged) = pending.upserts.get(path) {
                return Ok(Some(staged.clone()));
            }
            if pending.is_removed(path) {
                return Ok(None);
            }
        }
        self.db_get(path).await
    }

    async fn require(&self, path: &str) -> Result<StagedNode> {
        self.lookup(path)
            .await?
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// Every node of the subtree rooted at `root`, as the session sees it.
    async fn subtree(&self, root: &str) -> Result<BTreeMap<String, StagedNode>> {
        let mut nodes = BTreeMap::new();

        // starts_with rather than LIKE: node names may contain % or _
        let mut rows = sqlx::query(
            "SELECT path, id, node_type, properties FROM nodes
             WHERE workspace = $1 AND (path = $2 OR starts_with(path, $2 || '/'))",
        )
        .bind(&self.workspace)
        .bind(root)
        .fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            let path: String = row.try_get("path")?;
            nodes.insert(path, Self::row_to_staged(&row)?);
        }
        drop(rows);

        let pending = self.pending.read().await;
        nodes.retain(|path, _| !pending.is_removed(path));
        for (path, staged) in &pending.upserts {
            if is_within(root, path) {
                nodes.insert(path.clone(), staged.clone());
            }
        }
        Ok(nodes)
    }

    async fn check_target(&self, from: &str, to: &str, source_type: NodeType) -> Result<()> {
        if self.lookup(to).await?.is_some() {
            return Err(FsError::AlreadyExists(to.to_string()));
        }
        if is_within(from, to) {
            return Err(FsError::InvalidOperation(format!(
                "cannot place {} inside its own subtree {}",
                to, from
            )));
        }
        let parent = parent_of(to);
        let parent_node = self.require(parent).await?;
        if !can_hold(parent_node.node_type, source_type) {
            return Err(FsError::InvalidOperation(format!(
                "{} node {} cannot hold a {} child",
                parent_node.node_type, parent, source_type
            )));
        }
        Ok(())
    }
}

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

#[async_trait]
impl Session for SqlSession {
    async fn node(&self, path: &str) -> Result<Node> {
        let staged = self.require(path).await?;
        Ok(Node {
            id: staged.id,
            path: path.to_string(),
            node_type: staged.node_type,
            properties: staged.properties,
        })
    }

    async fn node_exists(&self, path: &str) -> Result<bool> {
        Ok(self.lookup(path).await?.is_some())
    }

    async fn create_node(&self, path: &str, node_type: NodeType) -> Result<Node> {
        check_abs(path)?;
        if path == "/" || self.lookup(path).await?.is_some() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let parent = parent_of(path);
        let parent_node = self.require(parent).await?;
        if !can_hold(parent_node.node_type, node_type) {
            return Err(FsError::InvalidOperation(format!(
                "{} node {} cannot hold a {} child",
                parent_node.node_type, parent, node_type
            )));
        }

        let staged = StagedNode {
            id: Uuid::new_v4(),
            node_type,
            properties: HashMap::new(),
        };
        let node = Node {
            id: staged.id,
            path: path.to_string(),
            node_type,
            properties: HashMap::new(),
        };
        self.pending
            .write()
            .await
            .upserts
            .insert(path.to_string(), staged);
        debug!("create_node: {} ({})", path, node_type);
        Ok(node)
    }

    async fn set_property(&self, path: &str, name: &str, value: PropertyValue) -> Result<()> {
        let mut staged = self.require(path).await?;
        staged.properties.insert(name.to_string(), value);
        self.pending
            .write()
            .await
            .upserts
            .insert(path.to_string(), staged);
        Ok(())
    }

    async fn child_names(&self, path: &str) -> Result<Vec<String>> {
        self.require(path).await?;

        let mut names = BTreeSet::new();
        let mut rows = sqlx::query("SELECT path FROM nodes WHERE workspace = $1 AND parent_path = $2")
            .bind(&self.workspace)
            .bind(path)
            .fetch(&self.pool);
        let mut db_paths = Vec::new();
        while let Some(row) = rows.try_next().await? {
            db_paths.push(row.try_get::<String, _>("path")?);
        }
        drop(rows);

        let pending = self.pending.read().await;
        for child in db_paths {
            if !pending.is_removed(&child) {
                names.insert(name_of(&child).to_string());
            }
        }
        for staged_path in pending.upserts.keys() {
            if parent_of(staged_path) == path && staged_path.as_str() != "/" {
                names.insert(name_of(staged_path).to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn move_node(&self, from: &str, to: &str) -> Result<()> {
        check_abs(from)?;
        check_abs(to)?;
        if from == "/" {
            return Err(FsError::InvalidOperation("cannot move the root".to_string()));
        }
        let source = self.require(from).await?;
        self.check_target(from, to, source.node_type).await?;

        let subtree = self.subtree(from).await?;
        let mut pending = self.pending.write().await;
        pending.upserts.retain(|path, _| !is_within(from, path));
        pending.removals.push(from.to_string());
        for (path, staged) in subtree {
            let new_path = format!("{}{}", to, &path[from.len()..]);
            pending.upserts.insert(new_path, staged);
        }
        debug!("move_node: {} -> {}", from, to);
        Ok(())
    }

    async fn copy_node(&self, from: &str, to: &str) -> Result<()> {
        check_abs(from)?;
        check_abs(to)?;
        let source = self.require(from).await?;
        self.check_target(from, to, source.node_type).await?;

        let subtree = self.subtree(from).await?;
        let mut pending = self.pending.write().await;
        for (path, mut staged) in subtree {
            staged.id = Uuid::new_v4();
            let new_path = format!("{}{}", to, &path[from.len()..]);
            pending.upserts.insert(new_path, staged);
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
        self.require(path).await?;

        let mut pending = self.pending.write().await;
        pending.upserts.retain(|staged, _| !is_within(path, staged));
        pending.removals.push(path.to_string());
        debug!("remove_node: {}", path);
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let mut pending = self.pending.write().await;
        if pending.upserts.is_empty() && pending.removals.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for root in &pending.removals {
            sqlx::query(
                "DELETE FROM nodes WHERE workspace = $1 AND (path = $2 OR starts_with(path, $2 || '/'))",
            )
            .bind(&self.workspace)
            .bind(root)
            .execute(&mut *tx)
            .await?;
        }
        // BTreeMap order writes parents before their children
        for (path, staged) in &pending.upserts {
            sqlx::query(
                "INSERT INTO nodes (workspace, path, parent_path, name, id, node_type, properties)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (workspace, path)
                 DO UPDATE SET id = $5, node_type = $6, properties = $7",
            )
            .bind(&self.workspace)
            .bind(path)
            .bind(parent_of(path))
            .bind(name_of(path))
            .bind(staged.id)
            .bind(staged.node_type.as_str())
            .bind(serde_json::to_value(&staged.properties)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(
            "save: {} upserts, {} removals",
            pending.upserts.len(),
            pending.removals.len()
        );
        *pending = Pending::default();
        Ok(())
    }

    async fn refresh(&self, keep_changes: bool) -> Result<()> {
        if keep_changes {
            return Ok(());
        }
        let mut pending = self.pending.write().await;
        *pending = Pending::default();
        debug!("refresh: transient changes discarded");
        Ok(())
    }
}
