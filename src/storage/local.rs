// src/storage/local.rs

//! Local filesystem KV backend.
//!
//! One directory per named store; atomic writes via temp-file + rename.
//! Keys are sanitized to a flat file namespace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::{KvStore, ListOptions};

/// Filesystem-backed store rooted at a data directory.
#[derive(Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
}

impl LocalStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Keys may contain characters that are hostile to filesystems; keep
    /// alphanumerics and a small safe set, replace the rest.
    fn sanitize(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn path(&self, store: &str, key: &str) -> PathBuf {
        self.root_dir.join(store).join(Self::sanitize(key))
    }

    async fn ensure_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for LocalStore {
    async fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(store, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn put(&self, store: &str, key: &str, value: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path(store, key);
        Self::ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&value).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, store: &str, key: &str) -> Result<()> {
        let path = self.path(store, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn list(&self, store: &str, options: ListOptions) -> Result<Vec<String>> {
        let dir = self.root_dir.join(store);
        let mut keys: Vec<String> = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(AppError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.ends_with(".tmp") {
                    keys.push(name);
                }
            }
        }

        keys.sort();
        if options.desc {
            keys.reverse();
        }

        let keys = keys.into_iter().skip(options.offset);
        Ok(match options.limit {
            Some(limit) => keys.take(limit).collect(),
            None => keys.collect(),
        })
    }
}
