use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ArtifactBackend, StoreError};
use crate::model::{ArtifactId, ArtifactSummary, PermanentArtifact};

/// Artifacts kept in process memory, keyed by native UUID
#[derive(Default)]
pub struct MemoryBackend {
    artifacts: RwLock<HashMap<Uuid, PermanentArtifact>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactBackend for MemoryBackend {
    async fn insert(&self, artifact: &PermanentArtifact) -> Result<(), StoreError> {
        self.artifacts
            .write()
            .await
            .insert(*artifact.id.as_uuid(), artifact.clone());
        Ok(())
    }

    async fn load(&self, id: ArtifactId) -> Result<Option<PermanentArtifact>, StoreError> {
        Ok(self.artifacts.read().await.get(id.as_uuid()).cloned())
    }

    async fn replace(&self, artifact: &PermanentArtifact) -> Result<(), StoreError> {
        let mut artifacts = self.artifacts.write().await;
        match artifacts.get_mut(artifact.id.as_uuid()) {
            Some(existing) => {
                *existing = artifact.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(artifact.id)),
        }
    }

    async fn remove(&self, id: ArtifactId) -> Result<bool, StoreError> {
        Ok(self.artifacts.write().await.remove(id.as_uuid()).is_some())
    }

    async fn summaries(&self) -> Result<Vec<ArtifactSummary>, StoreError> {
        Ok(self
            .artifacts
            .read()
            .await
            .values()
            .map(PermanentArtifact::summary)
            .collect())
    }
}
