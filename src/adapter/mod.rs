use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::{FsError, Result};
use crate::fs::{Adapter, EntryKind, FileMetadata};
use crate::path::{ancestors_of, parent_of, to_node_path};
use crate::repository::{
    Node, NodeType, PropertyValue, Session, CONTENT_CHILD, PROP_CREATED, PROP_DATA,
    PROP_LAST_MODIFIED, PROP_MIME_TYPE,
};

pub mod mime;

/// Translates filesystem calls onto content-repository primitives.
///
/// Layout follows the JCR file conventions: a file at virtual `a/b.txt`
/// becomes an `nt:file` node at `<root>/a/b.txt` whose `jcr:content`
/// resource child carries `jcr:data`, `jcr:mimeType` and
/// `jcr:lastModified`; directories become `nt:folder` nodes. Intermediate
/// folders are created on demand and every mutation ends in a session
/// `save()`.
#[derive(Debug)]
pub struct RepositoryAdapter {
    session: Box<dyn Session>,
    root: String,
}

impl RepositoryAdapter {
    /// Build an adapter rooted at `root` (e.g. `/flysystem`), creating the
    /// root folder chain if it is not there yet.
    pub async fn new(session: Box<dyn Session>, root: &str) -> Result<Self> {
        let root = if root.starts_with('/') {
            root.trim_end_matches('/').to_string()
        } else {
            format!("/{}", root.trim_end_matches('/'))
        };
        let root = if root.is_empty() { "/".to_string() } else { root };

        let adapter = Self { session, root };
        if adapter.root != "/" {
            adapter.ensure_folders(&adapter.root.clone()).await?;
            adapter.save_or_rollback().await?;
        }
        Ok(adapter)
    }

    fn node_path(&self, relative: &str) -> String {
        to_node_path(&self.root, relative)
    }

    fn content_path(file_path: &str) -> String {
        format!("{}/{}", file_path, CONTENT_CHILD)
    }

    /// Virtual path of a node path under this adapter's root, for error
    /// reporting; callers only ever see virtual paths.
    fn virtual_path(&self, node_path: &str) -> String {
        let stripped = if self.root == "/" {
            node_path.strip_prefix('/')
        } else {
            node_path
                .strip_prefix(self.root.as_str())
                .map(|rest| rest.trim_start_matches('/'))
        };
        stripped.unwrap_or(node_path).to_string()
    }

    /// Create every missing folder along `target` (inclusive); an existing
    /// non-folder node anywhere on the chain is an error.
    async fn ensure_folders(&self, target: &str) -> Result<()> {
        let mut chain = ancestors_of(target);
        chain.push(target.to_string());
        for path in chain {
            match self.session.node(&path).await {
                Ok(node) if node.is_folder() => continue,
                Ok(_) => return Err(FsError::NotADirectory(self.virtual_path(&path))),
                Err(FsError::NotFound(_)) => {
                    self.session.create_node(&path, NodeType::Folder).await?;
                    self.session
                        .set_property(&path, PROP_CREATED, PropertyValue::Date(Utc::now()))
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Save the session, dropping the transient changes if the save fails
    /// so a failed operation cannot leak into the next one.
    async fn save_or_rollback(&self) -> Result<()> {
        if let Err(e) = self.session.save().await {
            self.session.refresh(false).await.ok();
            return Err(e);
        }
        Ok(())
    }

    /// Fetch a node expected to be a file.
    async fn file_node(&self, relative: &str) -> Result<Node> {
        let node = self.session.node(&self.node_path(relative)).await?;
        if !node.is_file() {
            return Err(FsError::NotAFile(relative.to_string()));
        }
        Ok(node)
    }

    /// Metadata for one entry, given its virtual path and node.
    async fn node_metadata(&self, relative: &str, node: &Node) -> Result<FileMetadata> {
        if node.is_folder() {
            return Ok(FileMetadata {
                path: relative.to_string(),
                kind: EntryKind::Directory,
                size: None,
                mime_type: None,
                last_modified: None,
            });
        }

        let content = self.session.node(&Self::content_path(&node.path)).await?;
        let size = content
            .property(PROP_DATA)
            .and_then(|v| v.as_binary())
            .map(|b| b.len() as u64)
            .unwrap_or(0);
        Ok(FileMetadata {
            path: relative.to_string(),
            kind: EntryKind::File,
            size: Some(size),
            mime_type: content
                .property(PROP_MIME_TYPE)
                .and_then(|v| v.as_str())
                .map(str::to_string),
            last_modified: content.property(PROP_LAST_MODIFIED).and_then(|v| v.as_date()),
        })
    }

    /// Move or copy share every check except the final session call.
    async fn relocate(&self, from: &str, to: &str, copy: bool) -> Result<()> {
        let from_path = self.node_path(from);
        let to_path = self.node_path(to);
        if from.is_empty() || to.is_empty() {
            return Err(FsError::InvalidPath(
                "cannot rename or copy the root".to_string(),
            ));
        }
        if !self.session.node_exists(&from_path).await? {
            return Err(FsError::NotFound(from.to_string()));
        }
        if self.session.node_exists(&to_path).await? {
            return Err(FsError::AlreadyExists(to.to_string()));
        }

        self.ensure_folders(parent_of(&to_path)).await?;
        if copy {
            self.session.copy_node(&from_path, &to_path).await?;
        } else {
            self.session.move_node(&from_path, &to_path).await?;
        }
        self.save_or_rollback().await?;
        debug!(
            "{}: {} -> {}",
            if copy { "copy" } else { "rename" },
            from,
            to
        );
        Ok(())
    }

    /// Preorder walk under `relative`, parents before children.
    async fn walk(
        &self,
        relative: &str,
        recursive: bool,
        out: &mut Vec<FileMetadata>,
    ) -> Result<()> {
        let mut stack = vec![relative.to_string()];
        while let Some(dir) = stack.pop() {
            let dir_path = self.node_path(&dir);
            let mut subdirs = Vec::new();
            for name in self.session.child_names(&dir_path).await? {
                let child_rel = if dir.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", dir, name)
                };
                let child = self.session.node(&self.node_path(&child_rel)).await?;
                out.push(self.node_metadata(&child_rel, &child).await?);
                if recursive && child.is_folder() {
                    subdirs.push(child_rel);
                }
            }
            // reversed so the stack pops them in sorted order
            stack.extend(subdirs.into_iter().rev());
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for RepositoryAdapter {
    async fn file_exists(&self, path: &str) -> Result<bool> {
        match self.session.node(&self.node_path(path)).await {
            Ok(node) => Ok(node.is_file()),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        if path.is_empty() {
            return Ok(true);
        }
        match self.session.node(&self.node_path(path)).await {
            Ok(node) => Ok(node.is_folder()),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        if path.is_empty() {
            return Err(FsError::InvalidPath("cannot write to the root".to_string()));
        }
        let file_path = self.node_path(path);

        let content_path = Self::content_path(&file_path);
        match self.session.node(&file_path).await {
            Ok(node) if node.is_file() => {
                if !self.session.node_exists(&content_path).await? {
                    self.session.create_node(&content_path, NodeType::Resource).await?;
                }
            }
            Ok(_) => return Err(FsError::NotAFile(path.to_string())),
            Err(FsError::NotFound(_)) => {
                self.ensure_folders(parent_of(&file_path)).await?;
                self.session.create_node(&file_path, NodeType::File).await?;
                self.session.create_node(&content_path, NodeType::Resource).await?;
            }
            Err(e) => return Err(e),
        }

        self.session
            .set_property(&content_path, PROP_DATA, PropertyValue::Binary(contents.to_vec()))
            .await?;
        self.session
            .set_property(
                &content_path,
                PROP_MIME_TYPE,
                PropertyValue::String(mime::guess(path).to_string()),
            )
            .await?;
        self.session
            .set_property(&content_path, PROP_LAST_MODIFIED, PropertyValue::Date(Utc::now()))
            .await?;
        self.save_or_rollback().await?;
        debug!("write: {} ({} bytes)", path, contents.len());
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let node = self.file_node(path).await?;
        let content = self.session.node(&Self::content_path(&node.path)).await?;
        content
            .property(PROP_DATA)
            .and_then(|v| v.as_binary())
            .map(|b| b.to_vec())
            .ok_or_else(|| FsError::Repository(format!("file node {} has no content", path)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let node = self.file_node(path).await?;
        self.session.remove_node(&node.path).await?;
        self.save_or_rollback().await?;
        debug!("delete: {}", path);
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(FsError::InvalidPath(
                "cannot delete the root directory".to_string(),
            ));
        }
        let node = self.session.node(&self.node_path(path)).await?;
        if !node.is_folder() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        self.session.remove_node(&node.path).await?;
        self.save_or_rollback().await?;
        debug!("delete_directory: {}", path);
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        self.ensure_folders(&self.node_path(path)).await?;
        self.save_or_rollback().await?;
        debug!("create_directory: {}", path);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.relocate(from, to, false).await
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.relocate(from, to, true).await
    }

    async fn list_contents(&self, path: &str, recursive: bool) -> Result<Vec<FileMetadata>> {
        if !path.is_empty() {
            let node = self.session.node(&self.node_path(path)).await?;
            if !node.is_folder() {
                return Err(FsError::NotADirectory(path.to_string()));
            }
        }
        let mut entries = Vec::new();
        self.walk(path, recursive, &mut entries).await?;
        Ok(entries)
    }

    async fn metadata(&self, path: &str) -> Result<FileMetadata> {
        let node = self.session.node(&self.node_path(path)).await?;
        self.node_metadata(path, &node).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Filesystem;
    use crate::repository::memory::MemorySession;

    async fn filesystem() -> Filesystem {
        let session = Box::new(MemorySession::new());
        let adapter = RepositoryAdapter::new(session, "/flysystem").await.unwrap();
        Filesystem::new(Box::new(adapter))
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let fs = filesystem().await;
        fs.write("docs/hello.txt", b"hello world").await.unwrap();

        assert_eq!(fs.read("docs/hello.txt").await.unwrap(), b"hello world");
        assert!(fs.file_exists("docs/hello.txt").await.unwrap());
        // parent folder came into existence on demand
        assert!(fs.directory_exists("docs").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_contents() {
        let fs = filesystem().await;
        fs.write("a.txt", b"one").await.unwrap();
        fs.write("a.txt", b"two").await.unwrap();
        assert_eq!(fs.read("a.txt").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_write_over_directory_fails() {
        let fs = filesystem().await;
        fs.create_directory("dir").await.unwrap();
        let err = fs.write("dir", b"x").await.unwrap_err();
        assert!(matches!(err, FsError::NotAFile(_)));
    }

    #[tokio::test]
    async fn test_file_on_parent_chain_reports_virtual_path() {
        let fs = filesystem().await;
        fs.write("f.txt", b"x").await.unwrap();

        match fs.write("f.txt/child.txt", b"y").await.unwrap_err() {
            FsError::NotADirectory(path) => assert_eq!(path, "f.txt"),
            other => panic!("unexpected error: {:?}", other),
        }
        match fs.create_directory("f.txt/sub").await.unwrap_err() {
            FsError::NotADirectory(path) => assert_eq!(path, "f.txt"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let fs = filesystem().await;
        assert!(matches!(
            fs.read("nope.txt").await.unwrap_err(),
            FsError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_read_directory_fails() {
        let fs = filesystem().await;
        fs.create_directory("d").await.unwrap();
        assert!(matches!(
            fs.read("d").await.unwrap_err(),
            FsError::NotAFile(_)
        ));
    }

    #[tokio::test]
    async fn test_existence_checks_distinguish_kinds() {
        let fs = filesystem().await;
        fs.write("f.txt", b"x").await.unwrap();
        fs.create_directory("d").await.unwrap();

        assert!(fs.file_exists("f.txt").await.unwrap());
        assert!(!fs.file_exists("d").await.unwrap());
        assert!(fs.directory_exists("d").await.unwrap());
        assert!(!fs.directory_exists("f.txt").await.unwrap());
        assert!(fs.directory_exists("").await.unwrap());
        assert!(fs.directory_exists("/").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_file() {
        let fs = filesystem().await;
        fs.write("f.txt", b"x").await.unwrap();
        fs.delete("f.txt").await.unwrap();
        assert!(!fs.file_exists("f.txt").await.unwrap());

        assert!(matches!(
            fs.delete("f.txt").await.unwrap_err(),
            FsError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_rejects_directory() {
        let fs = filesystem().await;
        fs.create_directory("d").await.unwrap();
        assert!(matches!(
            fs.delete("d").await.unwrap_err(),
            FsError::NotAFile(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_directory_recursive() {
        let fs = filesystem().await;
        fs.write("d/sub/f.txt", b"x").await.unwrap();
        fs.delete_directory("d").await.unwrap();

        assert!(!fs.directory_exists("d").await.unwrap());
        assert!(!fs.file_exists("d/sub/f.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_root_rejected() {
        let fs = filesystem().await;
        assert!(matches!(
            fs.delete_directory("/").await.unwrap_err(),
            FsError::InvalidPath(_)
        ));
    }

    #[tokio::test]
    async fn test_create_directory_nested() {
        let fs = filesystem().await;
        fs.create_directory("a/b/c").await.unwrap();
        assert!(fs.directory_exists("a").await.unwrap());
        assert!(fs.directory_exists("a/b/c").await.unwrap());

        // idempotent
        fs.create_directory("a/b/c").await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_moves_subtree() {
        let fs = filesystem().await;
        fs.write("src/f.txt", b"data").await.unwrap();
        fs.rename("src", "dst/moved").await.unwrap();

        assert!(!fs.directory_exists("src").await.unwrap());
        assert_eq!(fs.read("dst/moved/f.txt").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_rename_onto_existing_fails() {
        let fs = filesystem().await;
        fs.write("a.txt", b"a").await.unwrap();
        fs.write("b.txt", b"b").await.unwrap();
        assert!(matches!(
            fs.rename("a.txt", "b.txt").await.unwrap_err(),
            FsError::AlreadyExists(_)
        ));
    }

    #[tokio::test]
    async fn test_copy_keeps_source() {
        let fs = filesystem().await;
        fs.write("orig.txt", b"data").await.unwrap();
        fs.copy("orig.txt", "backup/copy.txt").await.unwrap();

        assert_eq!(fs.read("orig.txt").await.unwrap(), b"data");
        assert_eq!(fs.read("backup/copy.txt").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_list_contents_shallow() {
        let fs = filesystem().await;
        fs.write("dir/b.txt", b"b").await.unwrap();
        fs.write("dir/a.txt", b"a").await.unwrap();
        fs.create_directory("dir/sub").await.unwrap();
        fs.write("other.txt", b"x").await.unwrap();

        let entries = fs.list_contents("dir", false).await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["dir/a.txt", "dir/b.txt", "dir/sub"]);
    }

    #[tokio::test]
    async fn test_list_contents_recursive_preorder() {
        let fs = filesystem().await;
        fs.write("a/one.txt", b"1").await.unwrap();
        fs.write("a/sub/two.txt", b"2").await.unwrap();
        fs.write("b.txt", b"3").await.unwrap();

        let entries = fs.list_contents("", true).await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["a", "b.txt", "a/one.txt", "a/sub", "a/sub/two.txt"]
        );
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let fs = filesystem().await;
        assert!(matches!(
            fs.list_contents("missing", false).await.unwrap_err(),
            FsError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_metadata_of_file() {
        let fs = filesystem().await;
        fs.write("docs/report.pdf", b"%PDF-").await.unwrap();

        let meta = fs.metadata("docs/report.pdf").await.unwrap();
        assert_eq!(meta.kind, EntryKind::File);
        assert_eq!(meta.size, Some(5));
        assert_eq!(meta.mime_type.as_deref(), Some("application/pdf"));
        assert!(meta.last_modified.is_some());

        assert_eq!(fs.file_size("docs/report.pdf").await.unwrap(), 5);
        assert_eq!(
            fs.mime_type("docs/report.pdf").await.unwrap(),
            "application/pdf"
        );
    }

    #[tokio::test]
    async fn test_metadata_of_directory() {
        let fs = filesystem().await;
        fs.create_directory("d").await.unwrap();

        let meta = fs.metadata("d").await.unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.size, None);
        assert!(fs.file_size("d").await.is_err());
    }

    #[tokio::test]
    async fn test_visibility_unsupported() {
        let fs = filesystem().await;
        assert!(matches!(
            fs.set_visibility("x", "public").await.unwrap_err(),
            FsError::Unsupported(_)
        ));
    }

    #[tokio::test]
    async fn test_facade_normalizes_paths() {
        let fs = filesystem().await;
        fs.write("/docs//./notes.txt", b"n").await.unwrap();
        assert_eq!(fs.read("docs/notes.txt").await.unwrap(), b"n");
        assert!(fs.read("../escape.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_root_at_slash() {
        let session = Box::new(MemorySession::new());
        let adapter = RepositoryAdapter::new(session, "/").await.unwrap();
        let fs = Filesystem::new(Box::new(adapter));

        fs.write("top.txt", b"t").await.unwrap();
        assert_eq!(fs.read("top.txt").await.unwrap(), b"t");
    }
}
