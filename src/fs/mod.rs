use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{FsError, Result};
use crate::path::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// What a stat/list operation reports about one entry.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Normalized virtual path of the entry.
    pub path: String,
    pub kind: EntryKind,
    /// Byte size; directories report `None`.
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileMetadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// The filesystem adapter contract.
///
/// Paths are virtual paths relative to the adapter's root; callers go
/// through [`Filesystem`], which normalizes them first.
#[async_trait]
pub trait Adapter: Send + Sync + std::fmt::Debug {
    async fn file_exists(&self, path: &str) -> Result<bool>;
    async fn directory_exists(&self, path: &str) -> Result<bool>;

    /// Create or overwrite a file, creating parent directories on demand.
    async fn write(&self, path: &str, contents: &[u8]) -> Result<()>;
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a single file.
    async fn delete(&self, path: &str) -> Result<()>;
    /// Delete a directory and everything in it.
    async fn delete_directory(&self, path: &str) -> Result<()>;
    async fn create_directory(&self, path: &str) -> Result<()>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;
    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    async fn list_contents(&self, path: &str, recursive: bool) -> Result<Vec<FileMetadata>>;
    async fn metadata(&self, path: &str) -> Result<FileMetadata>;
}

/// Filesystem facade over a boxed adapter.
///
/// Normalizes virtual paths before delegating, so adapters only ever see
/// canonical relative paths.
#[derive(Debug)]
pub struct Filesystem {
    adapter: Box<dyn Adapter>,
}

impl Filesystem {
    pub fn new(adapter: Box<dyn Adapter>) -> Self {
        Self { adapter }
    }

    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        self.adapter.file_exists(&normalize(path)?).await
    }

    pub async fn directory_exists(&self, path: &str) -> Result<bool> {
        self.adapter.directory_exists(&normalize(path)?).await
    }

    pub async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.adapter.write(&normalize(path)?, contents).await
    }

    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.adapter.read(&normalize(path)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.adapter.delete(&normalize(path)?).await
    }

    pub async fn delete_directory(&self, path: &str) -> Result<()> {
        self.adapter.delete_directory(&normalize(path)?).await
    }

    pub async fn create_directory(&self, path: &str) -> Result<()> {
        self.adapter.create_directory(&normalize(path)?).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.adapter.rename(&normalize(from)?, &normalize(to)?).await
    }

    pub async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.adapter.copy(&normalize(from)?, &normalize(to)?).await
    }

    pub async fn list_contents(&self, path: &str, recursive: bool) -> Result<Vec<FileMetadata>> {
        self.adapter.list_contents(&normalize(path)?, recursive).await
    }

    pub async fn metadata(&self, path: &str) -> Result<FileMetadata> {
        self.adapter.metadata(&normalize(path)?).await
    }

    pub async fn file_size(&self, path: &str) -> Result<u64> {
        let meta = self.metadata(path).await?;
        meta.size
            .ok_or_else(|| FsError::NotAFile(meta.path))
    }

    pub async fn mime_type(&self, path: &str) -> Result<String> {
        let meta = self.metadata(path).await?;
        meta.mime_type
            .ok_or_else(|| FsError::NotAFile(meta.path))
    }

    pub async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let meta = self.metadata(path).await?;
        meta.last_modified
            .ok_or_else(|| FsError::NotAFile(meta.path))
    }

    /// Permission bits have no counterpart in the node store.
    pub async fn set_visibility(&self, _path: &str, _visibility: &str) -> Result<()> {
        Err(FsError::Unsupported(
            "visibility is not supported by the repository adapter".to_string(),
        ))
    }
}
