//! Local filesystem storage rooted at the vault folder

use super::{
    check_relative, collision_candidate, Storage, StorageError, StorageResult,
    MAX_COLLISION_SUFFIX,
};
use crate::types::FileRef;
use crate::workflow::tags::extract_tags;
use async_trait::async_trait;
use fo_common::time::system_time_to_millis;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// [`Storage`] backed by a directory on disk
///
/// Name allocation and the operation using the name run under one lock, so
/// two concurrent `safe_*` calls never pick the same free name.
pub struct LocalStorage {
    root: PathBuf,
    op_lock: Mutex<()>,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            op_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> StorageResult<PathBuf> {
        check_relative(path)?;
        Ok(self.root.join(path))
    }

    fn relative(&self, absolute: &Path) -> PathBuf {
        absolute
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| absolute.to_path_buf())
    }

    async fn ensure_parent(&self, absolute: &Path) -> StorageResult<()> {
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        Ok(())
    }

    /// First free collision candidate; caller must hold `op_lock`
    async fn allocate(&self, desired: &Path) -> StorageResult<PathBuf> {
        for n in 0..MAX_COLLISION_SUFFIX {
            let candidate = collision_candidate(desired, n);
            let absolute = self.resolve(&candidate)?;
            let taken = tokio::fs::try_exists(&absolute)
                .await
                .map_err(|e| StorageError::io(&absolute, e))?;
            if !taken {
                return Ok(candidate);
            }
        }
        Err(StorageError::Exhausted(desired.to_path_buf()))
    }

    fn file_ref(&self, absolute: &Path, metadata: &std::fs::Metadata) -> FileRef {
        let modified_ms = metadata
            .modified()
            .map(system_time_to_millis)
            .unwrap_or_default();
        FileRef::new(self.relative(absolute), modified_ms, metadata.len())
    }

    /// Blocking recursive walk, hidden entries pruned
    fn walk(root: &Path, start: &Path) -> Vec<DirEntry> {
        WalkDir::new(start)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.path() == start || e.path() == root || !is_hidden(e))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Error accessing entry: {}", e);
                    None
                }
            })
            .collect()
    }

    async fn walk_async(&self, start: PathBuf) -> StorageResult<Vec<DirEntry>> {
        let root = self.root.clone();
        let start_for_err = start.clone();
        tokio::task::spawn_blocking(move || Self::walk(&root, &start))
            .await
            .map_err(|e| StorageError::io(start_for_err, std::io::Error::other(e.to_string())))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[async_trait]
impl Storage for LocalStorage {
    fn absolute(&self, path: &Path) -> StorageResult<PathBuf> {
        self.resolve(path)
    }

    async fn exists(&self, path: &Path) -> bool {
        match self.resolve(path) {
            Ok(absolute) => tokio::fs::try_exists(absolute).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn stat(&self, path: &Path) -> StorageResult<FileRef> {
        let absolute = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&absolute)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        Ok(self.file_ref(&absolute, &metadata))
    }

    async fn read_to_string(&self, path: &Path) -> StorageResult<String> {
        let absolute = self.resolve(path)?;
        tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn write(&self, path: &Path, content: &str) -> StorageResult<()> {
        let absolute = self.resolve(path)?;
        self.ensure_parent(&absolute).await?;
        tokio::fs::write(&absolute, content)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn append(&self, path: &Path, content: &str) -> StorageResult<()> {
        let absolute = self.resolve(path)?;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&absolute)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StorageError::io(path, e))?;
        file.flush().await.map_err(|e| StorageError::io(path, e))
    }

    async fn safe_create(&self, path: &Path, content: &str) -> StorageResult<PathBuf> {
        let _guard = self.op_lock.lock().await;
        self.ensure_parent(&self.resolve(path)?).await?;

        for n in 0..MAX_COLLISION_SUFFIX {
            let candidate = collision_candidate(path, n);
            let absolute = self.resolve(&candidate)?;
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&absolute)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())
                        .await
                        .map_err(|e| StorageError::io(&candidate, e))?;
                    file.flush()
                        .await
                        .map_err(|e| StorageError::io(&candidate, e))?;
                    debug!(path = %candidate.display(), "Created file");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::io(&candidate, e)),
            }
        }
        Err(StorageError::Exhausted(path.to_path_buf()))
    }

    async fn safe_move(&self, from: &Path, to_folder: &Path) -> StorageResult<PathBuf> {
        let _guard = self.op_lock.lock().await;
        let source = self.resolve(from)?;
        if !tokio::fs::try_exists(&source)
            .await
            .map_err(|e| StorageError::io(from, e))?
        {
            return Err(StorageError::NotFound(from.to_path_buf()));
        }
        if from.parent() == Some(to_folder) {
            return Ok(from.to_path_buf());
        }

        let name = from
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(from.display().to_string()))?;
        let destination = self.allocate(&to_folder.join(name)).await?;
        let target = self.resolve(&destination)?;
        self.ensure_parent(&target).await?;
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| StorageError::io(from, e))?;

        debug!(from = %from.display(), to = %destination.display(), "Moved file");
        Ok(destination)
    }

    async fn safe_rename(&self, from: &Path, new_stem: &str) -> StorageResult<PathBuf> {
        let _guard = self.op_lock.lock().await;
        let source = self.resolve(from)?;
        let name = match from.extension() {
            Some(ext) => format!("{}.{}", new_stem, ext.to_string_lossy()),
            None => new_stem.to_string(),
        };
        let desired = from.with_file_name(name);
        if desired == from {
            return Ok(desired);
        }

        let destination = self.allocate(&desired).await?;
        let target = self.resolve(&destination)?;
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| StorageError::io(from, e))?;

        debug!(from = %from.display(), to = %destination.display(), "Renamed file");
        Ok(destination)
    }

    async fn safe_copy(&self, from: &Path, to_folder: &Path) -> StorageResult<PathBuf> {
        let _guard = self.op_lock.lock().await;
        let source = self.resolve(from)?;
        let name = from
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(from.display().to_string()))?;
        let destination = self.allocate(&to_folder.join(name)).await?;
        let target = self.resolve(&destination)?;
        self.ensure_parent(&target).await?;
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| StorageError::io(from, e))?;
        Ok(destination)
    }

    async fn ensure_folder(&self, path: &Path) -> StorageResult<()> {
        let absolute = self.resolve(path)?;
        tokio::fs::create_dir_all(&absolute)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn list_folders(&self) -> StorageResult<Vec<PathBuf>> {
        let entries = self.walk_async(self.root.clone()).await?;
        let mut folders: Vec<PathBuf> = entries
            .iter()
            .filter(|e| e.file_type().is_dir() && e.path() != self.root)
            .map(|e| self.relative(e.path()))
            .collect();
        folders.sort();
        Ok(folders)
    }

    async fn list_files(&self, folder: &Path) -> StorageResult<Vec<FileRef>> {
        let start = self.resolve(folder)?;
        if !tokio::fs::try_exists(&start)
            .await
            .map_err(|e| StorageError::io(folder, e))?
        {
            return Ok(Vec::new());
        }

        let entries = self.walk_async(start).await?;
        let mut files = Vec::new();
        for entry in entries.iter().filter(|e| e.file_type().is_file()) {
            match entry.metadata() {
                Ok(metadata) => files.push(self.file_ref(entry.path(), &metadata)),
                Err(e) => warn!("Cannot stat {}: {}", entry.path().display(), e),
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn existing_tags(&self) -> StorageResult<Vec<String>> {
        let entries = self.walk_async(self.root.clone()).await?;
        let mut tags = BTreeSet::new();
        for entry in entries.iter().filter(|e| {
            e.file_type().is_file() && e.path().extension().is_some_and(|ext| ext == "md")
        }) {
            match tokio::fs::read_to_string(entry.path()).await {
                Ok(content) => tags.extend(extract_tags(&content)),
                Err(e) => debug!("Skipping {} while collecting tags: {}", entry.path().display(), e),
            }
        }
        Ok(tags.into_iter().collect())
    }
}
