//! Local filesystem implementation of [`FileOps`]
//!
//! Transfers never write the destination name directly: data is copied to
//! `<destination>.partial`, the size is verified, and the partial file is
//! renamed into place. A move only removes the source after that succeeds.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::services::collaborators::{FileOps, TransferMode};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Default, Clone)]
pub struct LocalFileOps;

impl LocalFileOps {
    pub fn new() -> Self {
        Self
    }
}

/// `<destination>.partial` next to the destination
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    destination.with_file_name(name)
}

async fn sha256_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize().to_vec())
}

/// Copy through a partial file and rename it into place
async fn copy_verified(source: &Path, destination: &Path) -> Result<()> {
    let partial = partial_path(destination);

    let outcome: Result<()> = async {
        let expected = fs::metadata(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?
            .len();
        let copied = fs::copy(source, &partial)
            .await
            .with_context(|| format!("Failed to copy to {}", partial.display()))?;
        if copied != expected {
            bail!(
                "Copy verification failed: expected {} bytes, wrote {}",
                expected,
                copied
            );
        }
        fs::rename(&partial, destination)
            .await
            .with_context(|| format!("Failed to rename into {}", destination.display()))?;
        Ok(())
    }
    .await;

    if outcome.is_err() && fs::try_exists(&partial).await.unwrap_or(false) {
        if let Err(e) = fs::remove_file(&partial).await {
            warn!(path = %partial.display(), error = %e, "Failed to remove partial file");
        }
    }

    outcome
}

#[async_trait]
impl FileOps for LocalFileOps {
    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?
            .len())
    }

    async fn compare_content(&self, a: &Path, b: &Path) -> Result<bool> {
        if self.file_size(a).await? != self.file_size(b).await? {
            return Ok(false);
        }
        Ok(sha256_file(a).await? == sha256_file(b).await?)
    }

    async fn transfer(&self, source: &Path, destination: &Path, mode: TransferMode) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        if mode == TransferMode::Move {
            // Same filesystem: an atomic rename is all we need
            match fs::rename(source, destination).await {
                Ok(()) => {
                    debug!(
                        source = %source.display(),
                        destination = %destination.display(),
                        "Renamed file into library"
                    );
                    return Ok(());
                }
                Err(e) => debug!(error = %e, "Rename failed, falling back to copy"),
            }
        }

        copy_verified(source, destination).await?;

        if mode == TransferMode::Move
            && let Err(e) = fs::remove_file(source).await
        {
            warn!(
                path = %source.display(),
                error = %e,
                "File copied but source could not be removed"
            );
        }

        debug!(
            source = %source.display(),
            destination = %destination.display(),
            mode = mode.as_str(),
            "Transferred file into library"
        );
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to delete {}", path.display()))
    }
}
