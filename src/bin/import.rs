use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crfs::{
    Filesystem, MemorySession, RepositoryAdapter, RepositoryBackend, RepositoryConfig, Session,
    SqlSession,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Import a local directory tree into the repository", long_about = None)]
struct Args {
    /// Local directory to import
    #[arg(short, long)]
    source: PathBuf,

    /// Virtual path prefix to import under
    #[arg(short = 'p', long, default_value = "")]
    prefix: String,

    /// Repository config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Postgres URL (overrides the config backend)
    #[arg(short, long)]
    database_url: Option<String>,

    /// Workspace name
    #[arg(short, long, default_value = "default")]
    workspace: String,

    /// Repository root path
    #[arg(short, long, default_value = "/flysystem")]
    root: String,
}

/// Walk `source` and mirror it under `prefix`, returning (directories, files)
/// imported. Entries that are neither files nor directories are skipped.
async fn import_tree(fs: &Filesystem, source: &Path, prefix: &str) -> anyhow::Result<(usize, usize)> {
    let mut dirs = 0;
    let mut files = 0;
    let mut stack = vec![(source.to_path_buf(), prefix.to_string())];

    while let Some((local_dir, virtual_dir)) = stack.pop() {
        if !virtual_dir.is_empty() {
            fs.create_directory(&virtual_dir).await?;
            dirs += 1;
        }

        let mut entries = tokio::fs::read_dir(&local_dir)
            .await
            .with_context(|| format!("reading {:?}", local_dir))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!("skipping non-UTF-8 entry {:?}", raw);
                    continue;
                }
            };
            let virtual_path = if virtual_dir.is_empty() {
                name
            } else {
                format!("{}/{}", virtual_dir, name)
            };

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push((entry.path(), virtual_path));
            } else if file_type.is_file() {
                let data = tokio::fs::read(entry.path()).await?;
                fs.write(&virtual_path, &data).await?;
                files += 1;
            } else {
                warn!("skipping special entry {:?}", entry.path());
            }
        }
    }

    Ok((dirs, files))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RepositoryConfig::load(path)
            .await
            .with_context(|| format!("loading config {:?}", path))?,
        None => RepositoryConfig::default(),
    };
    if let Some(url) = &args.database_url {
        config.backend = RepositoryBackend::Postgres { url: url.clone() };
    }

    let session: Box<dyn Session> = match &config.backend {
        RepositoryBackend::Memory => Box::new(MemorySession::new()),
        RepositoryBackend::Postgres { url } => {
            Box::new(SqlSession::connect(url, &args.workspace).await?)
        }
    };
    let adapter = RepositoryAdapter::new(session, &args.root).await?;
    let fs = Filesystem::new(Box::new(adapter));

    info!("importing {:?} under {:?}", args.source, args.prefix);
    let (dirs, files) = import_tree(&fs, &args.source, &args.prefix).await?;
    info!("import finished: {} directories, {} files", dirs, files);

    Ok(())
}
