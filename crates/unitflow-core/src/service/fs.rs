//! FileSystem trait for abstracting file I/O.
//!
//! Defined in unitflow-core so the template registry can persist templates
//! without depending on any specific filesystem implementation. The
//! `LocalFileSystem` adapter lives in unitflow-infra.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Abstraction over filesystem operations.
///
/// This trait allows the engine to read/write files without coupling to the
/// real filesystem, enabling easy testing with in-memory implementations.
pub trait FileSystem: Send + Sync {
    /// Write string content to a file, creating parent directories as needed.
    fn write_file(
        &self,
        path: &Path,
        content: &str,
    ) -> impl std::future::Future<Output = Result<(), io::Error>> + Send;

    /// Read a file's content as a string.
    fn read_file(
        &self,
        path: &Path,
    ) -> impl std::future::Future<Output = Result<String, io::Error>> + Send;

    /// Remove a single file.
    fn remove_file(
        &self,
        path: &Path,
    ) -> impl std::future::Future<Output = Result<(), io::Error>> + Send;

    /// Create a directory and all parent directories.
    fn create_dir_all(
        &self,
        path: &Path,
    ) -> impl std::future::Future<Output = Result<(), io::Error>> + Send;

    /// Check whether a path exists.
    fn exists(&self, path: &Path) -> impl std::future::Future<Output = bool> + Send;

    /// List the regular files directly inside `dir`, sorted by path.
    fn list_files(
        &self,
        dir: &Path,
    ) -> impl std::future::Future<Output = Result<Vec<PathBuf>, io::Error>> + Send;
}

/// `FileSystem` kept entirely in memory. Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileSystem {
    files: Arc<Mutex<BTreeMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
}

impl InMemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> MutexGuard<'_, BTreeMap<PathBuf, String>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dirs(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.dirs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn file_count(&self) -> usize {
        self.files().len()
    }
}

impl FileSystem for InMemoryFileSystem {
    async fn write_file(&self, path: &Path, content: &str) -> Result<(), io::Error> {
        if let Some(parent) = path.parent() {
            let mut dirs = self.dirs();
            if !dirs.iter().any(|d| d == parent) {
                dirs.push(parent.to_path_buf());
            }
        }
        self.files().insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<String, io::Error> {
        self.files()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    async fn remove_file(&self, path: &Path) -> Result<(), io::Error> {
        self.files()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), io::Error> {
        let mut dirs = self.dirs();
        if !dirs.iter().any(|d| d == path) {
            dirs.push(path.to_path_buf());
        }
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files().contains_key(path) || self.dirs().iter().any(|d| d == path)
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, io::Error> {
        if !self.dirs().iter().any(|d| d == dir) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                dir.display().to_string(),
            ));
        }
        Ok(self
            .files()
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect())
    }
}
