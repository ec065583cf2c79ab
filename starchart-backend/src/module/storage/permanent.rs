use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ArtifactBackend, ArtifactIndex, StoreError};
use crate::model::{
    ArtifactId, ArtifactPage, ArtifactSummary, Fingerprint, LocationRange, Metadata, Observation,
    PermanentArtifact,
};
use crate::module::clock::Clock;

/// Durable store of promoted star maps
pub struct PermanentStore {
    backend: Arc<dyn ArtifactBackend>,
    clock: Arc<dyn Clock>,
    index: RwLock<ArtifactIndex>,
}

impl PermanentStore {
    /// Wrap a backend and index everything it already holds
    pub async fn open(
        backend: Arc<dyn ArtifactBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let summaries = backend.summaries().await?;
        tracing::info!("Indexed {} stored star maps", summaries.len());
        Ok(Self {
            backend,
            clock,
            index: RwLock::new(ArtifactIndex::from_summaries(summaries)),
        })
    }

    /// Persist a copy of an ephemeral render under a new artifact id.
    ///
    /// `title` overrides the title the observation was rendered with.
    pub async fn promote(
        &self,
        entry_id: &Fingerprint,
        observation: &Observation,
        image: Vec<u8>,
        title: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<ArtifactId, StoreError> {
        let now = self.clock.now();
        let artifact = PermanentArtifact {
            id: ArtifactId::new(),
            latitude: observation.latitude(),
            longitude: observation.longitude(),
            observed_at: observation.local_time,
            title: title.or_else(|| observation.title.clone()),
            image,
            metadata,
            created_at: now,
            updated_at: now,
        };

        self.backend.insert(&artifact).await?;
        self.index.write().await.insert(artifact.summary());

        tracing::info!("Promoted star map {} to artifact {}", entry_id, artifact.id);
        Ok(artifact.id)
    }

    pub async fn summary(&self, id: ArtifactId) -> Option<ArtifactSummary> {
        self.index.read().await.get(&id).cloned()
    }

    pub async fn fetch(&self, id: ArtifactId) -> Result<Option<PermanentArtifact>, StoreError> {
        self.backend.load(id).await
    }

    /// Most recent first
    pub async fn list(&self, offset: usize, limit: usize) -> ArtifactPage {
        let index = self.index.read().await;
        ArtifactPage {
            items: index.page(offset, limit),
            total: index.len(),
            offset,
            limit,
        }
    }

    /// Returns whether the artifact existed
    pub async fn delete(&self, id: ArtifactId) -> Result<bool, StoreError> {
        let mut index = self.index.write().await;
        let existed = self.backend.remove(id).await?;
        index.remove(&id);
        if existed {
            tracing::info!("Deleted artifact {}", id);
        }
        Ok(existed)
    }

    /// Change title and/or metadata. `None` leaves a field as it is; a blank
    /// title clears it. Returns `None` if the artifact does not exist.
    pub async fn update(
        &self,
        id: ArtifactId,
        title: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<Option<PermanentArtifact>, StoreError> {
        // Held across the read-modify-write so a concurrent delete cannot
        // interleave.
        let mut index = self.index.write().await;

        let Some(mut artifact) = self.backend.load(id).await? else {
            return Ok(None);
        };

        if let Some(title) = title {
            let title = title.trim();
            artifact.title = (!title.is_empty()).then(|| title.to_string());
        }
        if let Some(metadata) = metadata {
            artifact.metadata = Some(metadata);
        }
        artifact.updated_at = self.clock.now().max(artifact.updated_at);

        match self.backend.replace(&artifact).await {
            Ok(()) => {}
            Err(StoreError::Missing(_)) => return Ok(None),
            Err(e) => return Err(e),
        }
        index.insert(artifact.summary());

        tracing::debug!("Updated artifact {}", id);
        Ok(Some(artifact))
    }

    /// Artifacts inside an inclusive latitude/longitude box
    pub async fn find_by_location(&self, range: &LocationRange) -> Vec<ArtifactSummary> {
        self.index.read().await.in_location(range)
    }

    /// Artifacts observed within `[from, to]`, oldest first
    pub async fn find_by_observation_time(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<ArtifactSummary> {
        self.index.read().await.observed_between(from, to)
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{fingerprint, ObservationRequest};
    use crate::module::clock::ManualClock;
    use crate::module::storage::{FileBackend, MemoryBackend};
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tempfile::TempDir;

    fn observation(latitude: f64, longitude: f64, hour: u32) -> Observation {
        ObservationRequest {
            latitude,
            longitude,
            year: 2024,
            month: 1,
            day: 15,
            hour,
            minute: 0,
            timezone_offset: -5,
            title: Some("Rendered title".to_string()),
        }
        .validate()
        .unwrap()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 16, 3, 0, 0).unwrap()
    }

    async fn memory_store() -> (PermanentStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = PermanentStore::open(Arc::new(MemoryBackend::new()), clock.clone())
            .await
            .unwrap();
        (store, clock)
    }

    async fn promote(store: &PermanentStore, obs: &Observation, image: &[u8]) -> ArtifactId {
        store
            .promote(&fingerprint(obs), obs, image.to_vec(), None, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_promote_then_fetch() {
        let (store, _) = memory_store().await;
        let obs = observation(40.7128, -74.006, 22);
        let mut metadata = Metadata::new();
        metadata.insert("gift".to_string(), json!(true));

        let id = store
            .promote(&fingerprint(&obs), &obs, vec![1, 2, 3], None, Some(metadata.clone()))
            .await
            .unwrap();

        let artifact = store.fetch(id).await.unwrap().unwrap();
        assert_eq!(artifact.image, vec![1, 2, 3]);
        assert_eq!(artifact.latitude, 40.7128);
        assert_eq!(artifact.observed_at, obs.local_time);
        assert_eq!(artifact.title.as_deref(), Some("Rendered title"));
        assert_eq!(artifact.metadata, Some(metadata));
        assert_eq!(artifact.created_at, start());
        assert_eq!(store.summary(id).await.unwrap(), artifact.summary());
    }

    #[tokio::test]
    async fn test_promote_title_override_and_fresh_ids() {
        let (store, _) = memory_store().await;
        let obs = observation(40.7128, -74.006, 22);
        let a = store
            .promote(&fingerprint(&obs), &obs, vec![1], Some("Mine".to_string()), None)
            .await
            .unwrap();
        let b = promote(&store, &obs, &[1]).await;

        assert_ne!(a, b);
        assert_eq!(store.len().await, 2);
        assert_eq!(store.summary(a).await.unwrap().title.as_deref(), Some("Mine"));
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let (store, clock) = memory_store().await;
        let mut ids = Vec::new();
        for i in 0..5u8 {
            ids.push(promote(&store, &observation(10.0 + f64::from(i), 0.0, 20), &[i]).await);
            clock.advance(Duration::minutes(1));
        }

        let page = store.list(1, 2).await;
        assert_eq!(page.total, 5);
        assert_eq!(page.offset, 1);
        assert_eq!(page.limit, 2);
        let listed: Vec<ArtifactId> = page.items.iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![ids[3], ids[2]]);
    }

    #[tokio::test]
    async fn test_update_bumps_updated_at() {
        let (store, clock) = memory_store().await;
        let id = promote(&store, &observation(40.0, -74.0, 22), &[1]).await;

        clock.advance(Duration::hours(2));
        let mut metadata = Metadata::new();
        metadata.insert("note".to_string(), json!("framed"));
        let updated = store
            .update(id, Some("  New title ".to_string()), Some(metadata.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title.as_deref(), Some("New title"));
        assert_eq!(updated.metadata, Some(metadata.clone()));
        assert_eq!(updated.created_at, start());
        assert_eq!(updated.updated_at, start() + Duration::hours(2));

        // Metadata untouched when omitted, blank title clears
        let cleared = store.update(id, Some(String::new()), None).await.unwrap().unwrap();
        assert_eq!(cleared.title, None);
        assert_eq!(cleared.metadata, Some(metadata));
        assert_eq!(store.summary(id).await.unwrap().title, None);

        assert!(store.update(ArtifactId::new(), None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _) = memory_store().await;
        let id = promote(&store, &observation(40.0, -74.0, 22), &[1]).await;

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(store.fetch(id).await.unwrap().is_none());
        assert_eq!(store.list(0, 10).await.total, 0);
    }

    #[tokio::test]
    async fn test_find_by_location_and_time() {
        let (store, _) = memory_store().await;
        let nyc = promote(&store, &observation(40.7128, -74.006, 22), &[1]).await;
        let _london = promote(&store, &observation(51.5074, -0.1278, 18), &[2]).await;

        let near_nyc = store
            .find_by_location(&LocationRange::around(40.7, -74.0, 0.5))
            .await;
        assert_eq!(near_nyc.len(), 1);
        assert_eq!(near_nyc[0].id, nyc);

        // 22:00 at UTC-05:00 is 03:00 UTC the next day
        let from = Utc.with_ymd_and_hms(2024, 1, 16, 2, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 16, 4, 0, 0).unwrap();
        let observed = store.find_by_observation_time(from, to).await;
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].id, nyc);
    }

    #[tokio::test]
    async fn test_file_backend_index_rebuilt_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));

        let id = {
            let backend = Arc::new(FileBackend::open(temp_dir.path()).await.unwrap());
            let store = PermanentStore::open(backend, clock.clone()).await.unwrap();
            promote(&store, &observation(40.7128, -74.006, 22), &[9, 9]).await
        };

        let backend = Arc::new(FileBackend::open(temp_dir.path()).await.unwrap());
        let store = PermanentStore::open(backend, clock).await.unwrap();
        let page = store.list(0, 10).await;
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, id);
        assert_eq!(store.fetch(id).await.unwrap().unwrap().image, vec![9, 9]);
    }
}
