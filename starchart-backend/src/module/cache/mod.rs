///! Ephemeral image cache
///!
///! ## Layout
///! - `EphemeralStore`: pluggable backend keyed by fingerprint
///! - `memory`: in-process map
///! - `disk`: PNG files with JSON sidecars
///! - `EphemeralCache`: single-flight `get_or_generate` on top of a store

mod disk;
mod ephemeral;
mod memory;

pub use disk::DiskStore;
pub use ephemeral::EphemeralCache;
pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{CacheBackend, CacheConfig};
use crate::model::{Fingerprint, Observation};

/// A rendered image held for a bounded time
#[derive(Debug, Clone, PartialEq)]
pub struct EphemeralEntry {
    pub fingerprint: Fingerprint,
    pub observation: Observation,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Failure of a single render, shared with every caller waiting on it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("star map generation failed: {0}")]
    Render(String),

    #[error("star map generation aborted: {0}")]
    Aborted(String),
}

/// How a `get_or_generate` call was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Served from the store without waiting
    Cached,
    /// This call started the render
    Generated,
    /// Waited on a render started by another caller
    Joined,
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub entry: Arc<EphemeralEntry>,
    pub source: CacheSource,
}

impl CacheLookup {
    /// True unless this call paid for the render itself
    pub fn cache_hit(&self) -> bool {
        self.source != CacheSource::Generated
    }
}

/// Storage backend for ephemeral entries
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<EphemeralEntry>>>;

    /// Insert or replace the entry for its fingerprint
    async fn put(&self, entry: Arc<EphemeralEntry>) -> Result<()>;

    /// Remove every entry created strictly before `cutoff`; returns how many
    async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn len(&self) -> Result<usize>;
}

/// Open the backend selected in the configuration
pub async fn open_store(config: &CacheConfig) -> Result<Arc<dyn EphemeralStore>> {
    let store: Arc<dyn EphemeralStore> = match config.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::new(config.sweep_chunk_size)),
        CacheBackend::Disk => Arc::new(DiskStore::open(&config.directory).await?),
    };
    tracing::info!("Ephemeral cache backend: {:?}", config.backend);
    Ok(store)
}
