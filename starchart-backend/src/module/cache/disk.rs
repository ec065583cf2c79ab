///! Disk-backed ephemeral store
///!
///! Each entry is `<fingerprint>.png` plus a `<fingerprint>.json` sidecar with
///! the observation and creation time. The sidecar is written last and removed
///! first, so its presence marks a complete entry. Temporary files left by an
///! interrupted write are removed by the expiry sweep once they are older than
///! the cutoff.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{EphemeralEntry, EphemeralStore};
use crate::model::{Fingerprint, Observation};

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    fingerprint: Fingerprint,
    created_at: DateTime<Utc>,
    observation: Observation,
}

pub struct DiskStore {
    directory: PathBuf,
    /// Serializes writes against expiry deletions
    write_lock: Mutex<()>,
}

impl DiskStore {
    pub async fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory)
            .await
            .context(format!("Failed to create cache directory: {:?}", directory))?;
        Ok(Self {
            directory,
            write_lock: Mutex::new(()),
        })
    }

    fn image_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.directory.join(format!("{}.png", fingerprint))
    }

    fn sidecar_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.directory.join(format!("{}.json", fingerprint))
    }

    async fn read_sidecar(path: &Path) -> Result<Option<Sidecar>> {
        match tokio::fs::read(path).await {
            Ok(raw) => {
                let sidecar = serde_json::from_slice(&raw)
                    .context(format!("Corrupt cache sidecar: {:?}", path))?;
                Ok(Some(sidecar))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(format!("Failed to read cache sidecar: {:?}", path)),
        }
    }

    async fn paths_with_extension(&self, extension: &str) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.directory)
            .await
            .context("Failed to read cache directory")?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == extension) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Delete the entry behind `sidecar_path` if it is still older than
    /// `cutoff` once the write lock is held. A concurrent `put` may have
    /// refreshed it since the scan.
    async fn remove_if_older(&self, sidecar_path: &Path, cutoff: DateTime<Utc>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match Self::read_sidecar(sidecar_path).await? {
            Some(sidecar) if sidecar.created_at < cutoff => {
                remove_if_exists(sidecar_path).await?;
                remove_if_exists(&self.image_path(&sidecar.fingerprint)).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Remove temporary files last modified before `cutoff`
    async fn remove_stale_temporaries(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for path in self.paths_with_extension("tmp").await? {
            let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) => {
                    tracing::debug!("Skipping temporary file {:?}: {}", path, e);
                    continue;
                }
            };
            if modified < cutoff {
                remove_if_exists(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Write via a uniquely named temporary file and an atomic rename
async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::now_v7().simple()));
    tokio::fs::write(&tmp, content)
        .await
        .context(format!("Failed to write {:?}", tmp))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).context(format!("Failed to move {:?} into place", path));
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(format!("Failed to remove {:?}", path)),
    }
}

#[async_trait]
impl EphemeralStore for DiskStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<EphemeralEntry>>> {
        let Some(sidecar) = Self::read_sidecar(&self.sidecar_path(fingerprint)).await? else {
            return Ok(None);
        };

        let bytes = match tokio::fs::read(self.image_path(fingerprint)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Cache image missing for {}, treating as miss", fingerprint);
                return Ok(None);
            }
            Err(e) => return Err(e).context("Failed to read cached image"),
        };

        Ok(Some(Arc::new(EphemeralEntry {
            fingerprint: sidecar.fingerprint,
            observation: sidecar.observation,
            bytes,
            created_at: sidecar.created_at,
        })))
    }

    async fn put(&self, entry: Arc<EphemeralEntry>) -> Result<()> {
        let sidecar = Sidecar {
            fingerprint: entry.fingerprint.clone(),
            created_at: entry.created_at,
            observation: entry.observation.clone(),
        };
        let json = serde_json::to_vec_pretty(&sidecar)?;

        let _guard = self.write_lock.lock().await;
        write_atomic(&self.image_path(&entry.fingerprint), &entry.bytes).await?;
        write_atomic(&self.sidecar_path(&entry.fingerprint), &json).await?;

        tracing::debug!("Cached image on disk: {}", entry.fingerprint);
        Ok(())
    }

    async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;

        for path in self.paths_with_extension("json").await? {
            let sidecar = match Self::read_sidecar(&path).await {
                Ok(Some(sidecar)) => sidecar,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Skipping unreadable cache entry {:?}: {:#}", path, e);
                    continue;
                }
            };

            if sidecar.created_at < cutoff && self.remove_if_older(&path, cutoff).await? {
                removed += 1;
            }
        }

        let temporaries = self.remove_stale_temporaries(cutoff).await?;
        if temporaries > 0 {
            tracing::info!("Removed {} abandoned temporary cache files", temporaries);
        }

        Ok(removed)
    }

    /// Complete entries only; unreadable sidecars are not counted
    async fn len(&self) -> Result<usize> {
        let mut count = 0;
        for path in self.paths_with_extension("json").await? {
            if matches!(Self::read_sidecar(&path).await, Ok(Some(_))) {
                count += 1;
            }
        }
        Ok(count)
    }
}
