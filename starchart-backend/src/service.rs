use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, CacheConfig};
use crate::error::{StarChartError, StarChartResult};
use crate::model::{
    fingerprint, ArtifactId, ArtifactPage, ArtifactSummary, Fingerprint, LocationRange, Metadata,
    Observation, ObservationRequest, PermanentArtifact, ValidationError, MAX_TITLE_CHARS,
};
use crate::module::cache::{self, EphemeralCache, EphemeralEntry};
use crate::module::clock::{Clock, SystemClock};
use crate::module::janitor::CacheJanitor;
use crate::module::renderer::StarMapRenderer;
use crate::module::sky::{positions, project, Catalog, CatalogSource, SharedCatalog};
use crate::module::storage::{self, PermanentStore};

pub const MAX_PAGE_SIZE: usize = 100;

/// Result of a generation request
#[derive(Debug, Clone)]
pub struct GeneratedMap {
    pub fingerprint: Fingerprint,
    /// False only for the call that rendered the image
    pub cache_hit: bool,
    entry: Arc<EphemeralEntry>,
}

impl GeneratedMap {
    pub fn bytes(&self) -> &[u8] {
        &self.entry.bytes
    }

    pub fn observation(&self) -> &Observation {
        &self.entry.observation
    }
}

/// Facade over catalog, renderer, ephemeral cache and permanent store
pub struct StarChartService {
    catalog: Arc<SharedCatalog>,
    renderer: Arc<StarMapRenderer>,
    cache: EphemeralCache,
    store: PermanentStore,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl StarChartService {
    pub fn new(
        catalog: Arc<SharedCatalog>,
        renderer: Arc<StarMapRenderer>,
        cache: EphemeralCache,
        store: PermanentStore,
        clock: Arc<dyn Clock>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            catalog,
            renderer,
            cache,
            store,
            clock,
            ttl,
        }
    }

    /// Wire every component from configuration. The catalog is not loaded
    /// yet; call `warm_up` before serving.
    pub async fn from_config(config: &BackendConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let source = CatalogSource::parse(&config.catalog.source, &config.catalog.download_dir);
        let catalog = Arc::new(SharedCatalog::new(source, config.catalog.ephemeris.clone()));

        let renderer = Arc::new(StarMapRenderer::new(
            config.render.font_dir.as_deref(),
            config.render.default_title.clone(),
        ));

        let ephemeral = cache::open_store(&config.cache)
            .await
            .context("Failed to open ephemeral cache")?;
        let cache = EphemeralCache::new(ephemeral, clock.clone());

        let backend = storage::open_backend(&config.storage)
            .await
            .context("Failed to open permanent storage")?;
        let store = PermanentStore::open(backend, clock.clone())
            .await
            .context("Failed to index permanent storage")?;

        Ok(Self::new(catalog, renderer, cache, store, clock, config.cache.ttl()))
    }

    /// Load the catalog now instead of on the first request
    pub async fn warm_up(&self) -> anyhow::Result<()> {
        let catalog = self.catalog.ready().await?;
        info!("Star catalog ready ({} entries)", catalog.len());
        Ok(())
    }

    pub fn cache(&self) -> &EphemeralCache {
        &self.cache
    }

    /// Janitor sweeping this service's cache
    pub fn janitor(&self, config: &CacheConfig) -> CacheJanitor {
        CacheJanitor::new(self.cache.clone(), self.clock.clone(), config.into())
    }

    /// Validate, then serve from cache or render once
    pub async fn generate(&self, request: &ObservationRequest) -> StarChartResult<GeneratedMap> {
        let observation = request.validate()?;
        let fingerprint = fingerprint(&observation);

        let catalog = self
            .catalog
            .ready()
            .await
            .map_err(|e| StarChartError::CatalogUnavailable(format!("{:#}", e)))?;
        let renderer = self.renderer.clone();
        let target = observation.clone();

        let lookup = self
            .cache
            .get_or_generate(&fingerprint, &observation, move || async move {
                tokio::task::spawn_blocking(move || render_observation(&catalog, &renderer, &target))
                    .await
                    .context("Render task failed")
                    .and_then(|rendered| rendered)
            })
            .await?;

        debug!("Star map {} served ({:?})", fingerprint, lookup.source);

        Ok(GeneratedMap {
            fingerprint,
            cache_hit: lookup.cache_hit(),
            entry: lookup.entry,
        })
    }

    /// Copy a cached render into permanent storage
    pub async fn promote(
        &self,
        fingerprint: &Fingerprint,
        title: Option<String>,
        metadata: Option<Metadata>,
    ) -> StarChartResult<ArtifactSummary> {
        check_title(title.as_deref())?;

        let entry = self
            .cache
            .get(fingerprint)
            .await
            .map_err(|e| {
                warn!("Ephemeral cache read failed for {}: {:#}", fingerprint, e);
                StarChartError::CacheUnavailable(format!("{:#}", e))
            })?
            .ok_or_else(|| StarChartError::not_found("star map", fingerprint))?;

        let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let id = self
            .store
            .promote(fingerprint, &entry.observation, entry.bytes.clone(), title, metadata)
            .await?;

        self.store
            .summary(id)
            .await
            .ok_or_else(|| StarChartError::not_found("artifact", id))
    }

    pub async fn fetch(&self, id: ArtifactId) -> StarChartResult<PermanentArtifact> {
        self.store
            .fetch(id)
            .await?
            .ok_or_else(|| StarChartError::not_found("artifact", id))
    }

    /// Most recent first; `limit` is clamped to `1..=100`
    pub async fn list(&self, offset: usize, limit: usize) -> ArtifactPage {
        self.store
            .list(offset, limit.clamp(1, MAX_PAGE_SIZE))
            .await
    }

    pub async fn delete(&self, id: ArtifactId) -> StarChartResult<()> {
        if self.store.delete(id).await? {
            Ok(())
        } else {
            Err(StarChartError::not_found("artifact", id))
        }
    }

    pub async fn update(
        &self,
        id: ArtifactId,
        title: Option<String>,
        metadata: Option<Metadata>,
    ) -> StarChartResult<ArtifactSummary> {
        check_title(title.as_deref())?;
        self.store
            .update(id, title, metadata)
            .await?
            .map(|artifact| artifact.summary())
            .ok_or_else(|| StarChartError::not_found("artifact", id))
    }

    pub async fn find_by_location(&self, range: &LocationRange) -> Vec<ArtifactSummary> {
        self.store.find_by_location(range).await
    }

    pub async fn find_by_observation_time(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<ArtifactSummary> {
        self.store.find_by_observation_time(from, to).await
    }

    /// Drop cache entries older than the configured TTL
    pub async fn sweep_expired(&self) -> anyhow::Result<usize> {
        match self.clock.now().checked_sub_signed(self.ttl) {
            Some(cutoff) => self.cache.expire_before(cutoff).await,
            None => Ok(0),
        }
    }
}

fn check_title(title: Option<&str>) -> Result<(), ValidationError> {
    match title {
        Some(t) if t.trim().chars().count() > MAX_TITLE_CHARS => Err(ValidationError::TitleTooLong),
        _ => Ok(()),
    }
}

/// Full pipeline for one observation: positions, projection, raster.
fn render_observation(
    catalog: &Catalog,
    renderer: &StarMapRenderer,
    observation: &Observation,
) -> anyhow::Result<Vec<u8>> {
    let frame = catalog.resolve_observer(observation.latitude(), observation.longitude());
    let sky = positions(catalog, &frame, observation.instant());
    let stars = project(&sky);
    debug!("{} of {} catalog stars visible", stars.len(), catalog.len());

    let caption = renderer.caption(observation);
    renderer.render(&stars, &caption)
}
