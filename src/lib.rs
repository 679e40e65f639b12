pub mod error;
pub mod path;
pub mod repository;
pub mod adapter;
pub mod fs;
pub mod config;

pub use error::{FsError, Result};
pub use repository::{Node, NodeType, PropertyValue, Session};
pub use repository::memory::MemorySession;
pub use repository::sql::SqlSession;
pub use adapter::RepositoryAdapter;
pub use fs::{Adapter, EntryKind, FileMetadata, Filesystem};
pub use config::{RepositoryBackend, RepositoryConfig};
