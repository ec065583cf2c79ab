///! File-backed artifact storage
///!
///! One `<id>.json` record and one `<id>.png` image per artifact. Ids are
///! stored as hyphenated strings and metadata as JSON text, so records stay
///! readable by tools that know nothing about this crate.
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{ArtifactBackend, StoreError};
use crate::model::{ArtifactId, ArtifactSummary, Metadata, PermanentArtifact};

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactRecord {
    id: String,
    latitude: f64,
    longitude: f64,
    observed_at: DateTime<FixedOffset>,
    title: Option<String>,
    /// Metadata object encoded as JSON text
    metadata: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ArtifactRecord {
    fn from_artifact(artifact: &PermanentArtifact) -> Result<Self, StoreError> {
        let metadata = artifact
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        Ok(Self {
            id: artifact.id.to_string(),
            latitude: artifact.latitude,
            longitude: artifact.longitude,
            observed_at: artifact.observed_at,
            title: artifact.title.clone(),
            metadata,
            created_at: artifact.created_at,
            updated_at: artifact.updated_at,
        })
    }

    fn id(&self) -> Result<ArtifactId, StoreError> {
        self.id.parse().map_err(|e: uuid::Error| StoreError::Corrupt {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }

    fn summary(&self) -> Result<ArtifactSummary, StoreError> {
        Ok(ArtifactSummary {
            id: self.id()?,
            latitude: self.latitude,
            longitude: self.longitude,
            observed_at: self.observed_at,
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn into_artifact(self, image: Vec<u8>) -> Result<PermanentArtifact, StoreError> {
        let id = self.id()?;
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str::<Metadata>)
            .transpose()
            .map_err(|e| StoreError::Corrupt {
                id: self.id.clone(),
                reason: format!("metadata: {}", e),
            })?;
        Ok(PermanentArtifact {
            id,
            latitude: self.latitude,
            longitude: self.longitude,
            observed_at: self.observed_at,
            title: self.title,
            image,
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
    pub async fn open(directory: impl AsRef<Path>) -> Result<Self, StoreError> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory).await?;
        tracing::info!("Artifact storage directory: {:?}", directory);
        Ok(Self { directory })
    }

    fn record_path(&self, id: ArtifactId) -> PathBuf {
        self.directory.join(format!("{}.json", id))
    }

    fn image_path(&self, id: ArtifactId) -> PathBuf {
        self.directory.join(format!("{}.png", id))
    }

    async fn read_record(path: &Path) -> Result<Option<ArtifactRecord>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: &ArtifactRecord, id: ArtifactId) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(id), &json).await?;
        Ok(())
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::now_v7().simple()));
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ArtifactBackend for FileBackend {
    async fn insert(&self, artifact: &PermanentArtifact) -> Result<(), StoreError> {
        let record = ArtifactRecord::from_artifact(artifact)?;
        // Image first: a record without its image would be a dangling entry
        write_atomic(&self.image_path(artifact.id), &artifact.image).await?;
        self.write_record(&record, artifact.id).await
    }

    async fn load(&self, id: ArtifactId) -> Result<Option<PermanentArtifact>, StoreError> {
        let Some(record) = Self::read_record(&self.record_path(id)).await? else {
            return Ok(None);
        };
        let image = tokio::fs::read(self.image_path(id))
            .await
            .map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: format!("image: {}", e),
            })?;
        record.into_artifact(image).map(Some)
    }

    async fn replace(&self, artifact: &PermanentArtifact) -> Result<(), StoreError> {
        if !tokio::fs::try_exists(self.record_path(artifact.id)).await? {
            return Err(StoreError::Missing(artifact.id));
        }
        let record = ArtifactRecord::from_artifact(artifact)?;
        self.write_record(&record, artifact.id).await
    }

    async fn remove(&self, id: ArtifactId) -> Result<bool, StoreError> {
        let existed = remove_if_exists(&self.record_path(id)).await?;
        remove_if_exists(&self.image_path(id)).await?;
        Ok(existed)
    }

    async fn summaries(&self) -> Result<Vec<ArtifactSummary>, StoreError> {
        let mut summaries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.directory).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let summary = match Self::read_record(&path).await {
                Ok(Some(record)) => record.summary(),
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            match summary {
                Ok(summary) => summaries.push(summary),
                Err(e) => tracing::warn!("Skipping unreadable artifact record {:?}: {}", path, e),
            }
        }

        Ok(summaries)
    }
}
