//! Filesystem adapter for unitflow.
//!
//! Implements the `FileSystem` trait from `unitflow-core` for real filesystem
//! I/O, plus the data directory layout shared by the engine and the CLI.

use std::io;
use std::path::{Path, PathBuf};

use unitflow_core::service::fs::FileSystem;

/// Template storage on the local disk via `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }

    /// Template directory under a data directory: `{data_dir}/templates/`.
    pub fn templates_dir(data_dir: &Path) -> PathBuf {
        data_dir.join("templates")
    }
}

impl FileSystem for LocalFileSystem {
    async fn write_file(&self, path: &Path, content: &str) -> Result<(), io::Error> {
                if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await
    }

    async fn read_file(&self, path: &Path) -> Result<String, io::Error> {
        tokio::fs::read_to_string(path).await
    }

    async fn remove_file(&self, path: &Path) -> Result<(), io::Error> {
        tokio::fs::remove_file(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), io::Error> {
        tokio::fs::create_dir_all(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, io::Error> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Engine data directory.
///
/// Priority:
/// 1. `UNITFLOW_DATA_DIR` environment variable
/// 2. `~/.unitflow`
/// 3. `./.unitflow`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("UNITFLOW_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".unitflow");
    }

    // Relative to the working directory
    PathBuf::from(".unitflow")
}
