//! Vault storage primitives
//!
//! Every path crossing the [`Storage`] trait is relative to the vault root.
//! The `safe_*` operations never overwrite: when the desired name is taken
//! they allocate `name 1.ext`, `name 2.ext`, ... instead.

mod local;

pub use local::LocalStorage;

use crate::types::FileRef;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Upper bound on collision suffixes tried before giving up
pub const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(PathBuf),

    /// Absolute paths and `..` components are rejected
    #[error("Invalid vault path: {0}")]
    InvalidPath(String),

    #[error("No free name available for {0}")]
    Exhausted(PathBuf),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path)
        } else {
            StorageError::Io { path, source }
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// File storage operations used by the pipeline
#[async_trait]
pub trait Storage: Send + Sync {
    /// Resolve a vault-relative path to its on-disk location
    fn absolute(&self, path: &Path) -> StorageResult<PathBuf>;

    async fn exists(&self, path: &Path) -> bool;

    /// Current handle (mtime and size) for a file
    async fn stat(&self, path: &Path) -> StorageResult<FileRef>;

    async fn read_to_string(&self, path: &Path) -> StorageResult<String>;

    /// Replace the contents of an existing or new file
    async fn write(&self, path: &Path, content: &str) -> StorageResult<()>;

    async fn append(&self, path: &Path, content: &str) -> StorageResult<()>;

    /// Create a new file at `path` or the next free collision name
    async fn safe_create(&self, path: &Path, content: &str) -> StorageResult<PathBuf>;

    /// Move `from` into `to_folder`, keeping its name when free
    async fn safe_move(&self, from: &Path, to_folder: &Path) -> StorageResult<PathBuf>;

    /// Rename `from` within its folder, keeping the extension
    async fn safe_rename(&self, from: &Path, new_stem: &str) -> StorageResult<PathBuf>;

    /// Copy `from` into `to_folder`
    async fn safe_copy(&self, from: &Path, to_folder: &Path) -> StorageResult<PathBuf>;

    async fn ensure_folder(&self, path: &Path) -> StorageResult<()>;

    /// Every non-hidden folder in the vault
    async fn list_folders(&self) -> StorageResult<Vec<PathBuf>>;

    /// Every non-hidden file under `folder`, recursively
    async fn list_files(&self, folder: &Path) -> StorageResult<Vec<FileRef>>;

    /// Distinct `#tags` used across the vault's markdown files
    async fn existing_tags(&self) -> StorageResult<Vec<String>>;
}

/// Candidate name for collision attempt `n`
///
/// Attempt 0 is the desired path itself; later attempts insert ` n` before
/// the extension.
pub fn collision_candidate(desired: &Path, n: u32) -> PathBuf {
    if n == 0 {
        return desired.to_path_buf();
    }

    let stem = desired
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match desired.extension() {
        Some(ext) => format!("{} {}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{} {}", stem, n),
    };
    desired.with_file_name(name)
}

/// Reject paths that escape the vault
pub fn check_relative(path: &Path) -> StorageResult<()> {
    if path.as_os_str().is_empty() {
        return Err(StorageError::InvalidPath("empty path".to_string()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(StorageError::InvalidPath(path.display().to_string())),
        }
    }
    Ok(())
}

/// Strip characters that are not allowed in vault file names
pub fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'))
        .collect();
    cleaned.trim().trim_matches('.').trim().to_string()
}
