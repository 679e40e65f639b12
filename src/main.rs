use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crfs::{
    Filesystem, MemorySession, RepositoryAdapter, RepositoryBackend, RepositoryConfig, Session,
    SqlSession,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Filesystem operations against a content repository", long_about = None)]
struct Args {
    /// Repository config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Postgres URL (overrides the config backend)
    #[arg(short, long)]
    database_url: Option<String>,

    /// Workspace name
    #[arg(short, long, default_value = "default")]
    workspace: String,

    /// Repository root path the filesystem is mounted at
    #[arg(short, long, default_value = "/flysystem")]
    root: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },
    /// Print a file's contents
    Cat { path: String },
    /// Store a local file at a virtual path
    Put { path: String, local: PathBuf },
    /// Delete a file
    Rm { path: String },
    /// Delete a directory and its contents
    Rmdir { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Rename a file or directory
    Mv { from: String, to: String },
    /// Copy a file or directory
    Cp { from: String, to: String },
    /// Show metadata for a path
    Stat { path: String },
}

async fn build_filesystem(args: &Args) -> anyhow::Result<Filesystem> {
    let mut config = match &args.config {
        Some(path) => RepositoryConfig::load(path)
            .await
            .with_context(|| format!("loading config {:?}", path))?,
        None => RepositoryConfig::default(),
    };
    if let Some(url) = &args.database_url {
        config.backend = RepositoryBackend::Postgres { url: url.clone() };
    }
    config.workspace = args.workspace.clone();
    config.root = args.root.clone();

    let session: Box<dyn Session> = match &config.backend {
        RepositoryBackend::Memory => {
            info!("using in-memory workspace {}", config.workspace);
            Box::new(MemorySession::new())
        }
        RepositoryBackend::Postgres { url } => {
            info!("connecting to {} (workspace {})", url, config.workspace);
            Box::new(SqlSession::connect(url, &config.workspace).await?)
        }
    };

    let adapter = RepositoryAdapter::new(session, &config.root).await?;
    Ok(Filesystem::new(Box::new(adapter)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();
    let fs = build_filesystem(&args).await?;

    match &args.command {
        Command::Ls { path, recursive } => {
            for entry in fs.list_contents(path, *recursive).await? {
                let kind = if entry.is_dir() { "d" } else { "-" };
                let size = entry.size.map_or("-".to_string(), |s| s.to_string());
                println!("{} {:>10}  {}", kind, size, entry.path);
            }
        }
        Command::Cat { path } => {
            let data = fs.read(path).await?;
            tokio::io::AsyncWriteExt::write_all(&mut tokio::io::stdout(), &data).await?;
        }
        Command::Put { path, local } => {
            let data = tokio::fs::read(local)
                .await
                .with_context(|| format!("reading {:?}", local))?;
            fs.write(path, &data).await?;
            info!("stored {} ({} bytes)", path, data.len());
        }
        Command::Rm { path } => {
            fs.delete(path).await?;
            info!("deleted {}", path);
        }
        Command::Rmdir { path } => {
            fs.delete_directory(path).await?;
            info!("deleted directory {}", path);
        }
        Command::Mkdir { path } => {
            fs.create_directory(path).await?;
            info!("created directory {}", path);
        }
        Command::Mv { from, to } => {
            fs.rename(from, to).await?;
            info!("renamed {} -> {}", from, to);
        }
        Command::Cp { from, to } => {
            fs.copy(from, to).await?;
            info!("copied {} -> {}", from, to);
        }
        Command::Stat { path } => {
            let meta = fs.metadata(path).await?;
            if meta.is_dir() {
                println!("{}: directory", meta.path);
            } else {
                println!("{}: file", meta.path);
                println!("size: {}", meta.size.unwrap_or(0));
                if let Some(mime) = &meta.mime_type {
                    println!("mime: {}", mime);
                }
                if let Some(ts) = meta.last_modified {
                    println!("modified: {}", ts.to_rfc3339());
                }
            }
        }
    }

    Ok(())
}
