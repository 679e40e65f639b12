use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which session backend to talk to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RepositoryBackend {
    /// In-process workspace, gone when the process exits.
    Memory,
    /// Postgres-backed workspace.
    Postgres { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(flatten)]
    pub backend: RepositoryBackend,
    /// Workspace name inside the repository.
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Absolute node path the filesystem is rooted at.
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_workspace() -> String {
    "default".to_string()
}

fn default_root() -> String {
    "/flysystem".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            backend: RepositoryBackend::Memory,
            workspace: default_workspace(),
            root: default_root(),
        }
    }
}

impl RepositoryConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}
