use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;

/// Storage for dataset document bytes, addressed by relative path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), EngineError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, EngineError>;

    async fn delete(&self, path: &str) -> Result<(), EngineError>;

    async fn exists(&self, path: &str) -> Result<bool, EngineError>;
}

/// Verify that a relative blob path stays within the base directory.
/// Prevents path traversal attacks.
fn ensure_within(base: &Path, relative: &str) -> Result<PathBuf, EngineError> {
    let relative = Path::new(relative);
    let mut resolved = base.to_path_buf();
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(c) => {
                resolved.push(c);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(EngineError::ValidationFailed(
                    "Path traversal detected".to_string(),
                ));
            }
        }
    }
    if depth == 0 || !resolved.starts_with(base) {
        return Err(EngineError::ValidationFailed("Invalid blob path".to_string()));
    }
    Ok(resolved)
}

fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()))
}

/// Blob store backed by a directory tree on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    pub async fn new(base_path: PathBuf) -> Result<Self, EngineError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            EngineError::Internal(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self { base_path })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), EngineError> {
        let target = ensure_within(&self.base_path, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::Internal(format!("Failed to create blob dir for {path}: {e}"))
            })?;
        }

        // Write to a per-call sibling then rename, so readers never see a
        // torn file and concurrent writers to one path never share a temp.
        let tmp = temp_sibling(&target);
        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(EngineError::Internal(format!("Failed to write blob {path}: {e}")));
        }
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(EngineError::Internal(format!("Failed to commit blob {path}: {e}")));
        }

        debug!(path, size = data.len(), content_type, "Stored blob");
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        let target = ensure_within(&self.base_path, path)?;

        match fs::read(&target).await {
            Ok(data) => {
                debug!(path, size = data.len(), "Retrieved blob");
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EngineError::NotFound(format!("blob not found: {path}")))
            }
            Err(e) => Err(EngineError::Internal(format!("Failed to read blob {path}: {e}"))),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), EngineError> {
        let target = ensure_within(&self.base_path, path)?;

        match fs::remove_file(&target).await {
            Ok(()) => {
                debug!(path, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EngineError::NotFound(format!("blob not found: {path}")))
            }
            Err(e) => Err(EngineError::Internal(format!("Failed to delete blob {path}: {e}"))),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, EngineError> {
        let target = ensure_within(&self.base_path, path)?;
        fs::try_exists(&target)
            .await
            .map_err(|e| EngineError::Internal(format!("Failed to stat blob {path}: {e}")))
    }
}
