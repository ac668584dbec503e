//! # Artifact Store
//!
//! The local content store, rooted at a configured directory. An
//! artifact for path `a/b/c` lives at `<root>/a/b/c`. Publishing writes
//! a staging file next to the final location and renames it into place,
//! so readers only ever observe absent or fully written files.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use crate::error::StoreError;
use crate::ids;
use crate::path::ArtifactPath;

/// A cached artifact as seen by a reader.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    /// Absolute location of the artifact on disk.
    pub file: PathBuf,
    /// Size in bytes.
    pub len: u64,
    /// Modification time; equals the upstream `Last-Modified` when one
    /// was propagated at publish, otherwise the publish wall time.
    pub modified: SystemTime,
}

/// Path-addressed local file store with atomic publish.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io("create store root", &root, e))?;
        Ok(Self { root })
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target(&self, path: &ArtifactPath) -> PathBuf {
        self.root.join(path.to_relative())
    }

    /// Look up `path` in the store.
    ///
    /// Costs one stat. Returns `None` for absent or unreadable paths;
    /// never fails.
    pub async fn find(&self, path: &ArtifactPath) -> Option<StoredArtifact> {
        let file = self.target(path);
        match fs::metadata(&file).await {
            Ok(meta) if meta.is_file() => Some(StoredArtifact {
                file,
                len: meta.len(),
                modified: meta.modified().unwrap_or(UNIX_EPOCH),
            }),
            _ => None,
        }
    }

    /// Atomically place the file at `source` as the artifact for `path`.
    ///
    /// The source is copied into a staging file beside the final
    /// location (the source may live on a different filesystem, e.g.
    /// the OS temp directory) and then renamed into place. Concurrent
    /// publishes of the same path are both well formed; the last rename
    /// wins. The source file is left in place; callers that own a temp
    /// file discard it themselves.
    pub async fn publish_file(
        &self,
        path: &ArtifactPath,
        source: &Path,
        last_modified: Option<SystemTime>,
    ) -> Result<StoredArtifact, StoreError> {
        let target = self.target(path);
        let staging = self.staging_path(&target);

        self.prepare_parent(&target).await?;
        fs::copy(source, &staging)
            .await
            .map_err(|e| StoreError::io("stage artifact", &staging, e))?;
        self.promote(path, staging, target, last_modified).await
    }

    /// Variant of [`publish_file`](Self::publish_file) for in-memory bodies.
    pub async fn publish_bytes(
        &self,
        path: &ArtifactPath,
        body: Bytes,
        last_modified: Option<SystemTime>,
    ) -> Result<StoredArtifact, StoreError> {
        let target = self.target(path);
        let staging = self.staging_path(&target);

        self.prepare_parent(&target).await?;
        fs::write(&staging, &body)
            .await
            .map_err(|e| StoreError::io("stage artifact", &staging, e))?;
        self.promote(path, staging, target, last_modified).await
    }

    fn staging_path(&self, target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!("{name}.{}.tmp", ids::unique_suffix()))
    }

    async fn prepare_parent(&self, target: &Path) -> Result<(), StoreError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io("create parent directories", parent, e))?;
        }
        Ok(())
    }

    async fn promote(
        &self,
        path: &ArtifactPath,
        staging: PathBuf,
        target: PathBuf,
        last_modified: Option<SystemTime>,
    ) -> Result<StoredArtifact, StoreError> {
        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StoreError::io("publish artifact", &target, e));
        }

        if let Some(modified) = last_modified {
            set_modified(&target, modified)
                .await
                .map_err(|e| StoreError::io("set modification time", &target, e))?;
        }

        let meta = fs::metadata(&target)
            .await
            .map_err(|e| StoreError::io("stat published artifact", &target, e))?;
        debug!(path = %path, size = meta.len(), "artifact published");
        Ok(StoredArtifact {
            file: target,
            len: meta.len(),
            modified: meta.modified().unwrap_or(UNIX_EPOCH),
        })
    }
}

async fn set_modified(path: &Path, time: SystemTime) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::options().write(true).open(&path)?;
        file.set_modified(time)
    })
    .await
    .map_err(std::io::Error::other)?
}
