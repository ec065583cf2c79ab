///! Permanent star map storage
///!
///! ## Layout
///! - `ArtifactBackend`: pluggable persistence (`memory`, `file`)
///! - `ArtifactIndex`: ordered views for listing and lookups, shared by all backends
///! - `PermanentStore`: id allocation, timestamps and index upkeep

mod file;
mod index;
mod memory;
mod permanent;

pub use file::FileBackend;
pub use index::ArtifactIndex;
pub use memory::MemoryBackend;
pub use permanent::PermanentStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};
use crate::model::{ArtifactId, ArtifactSummary, PermanentArtifact};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt artifact record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// An update raced with a delete
    #[error("artifact vanished from storage: {0}")]
    Missing(ArtifactId),
}

#[async_trait]
pub trait ArtifactBackend: Send + Sync {
    async fn insert(&self, artifact: &PermanentArtifact) -> Result<(), StoreError>;

    async fn load(&self, id: ArtifactId) -> Result<Option<PermanentArtifact>, StoreError>;

    /// Overwrite an existing artifact; `Missing` if it does not exist
    async fn replace(&self, artifact: &PermanentArtifact) -> Result<(), StoreError>;

    /// Returns whether the artifact existed
    async fn remove(&self, id: ArtifactId) -> Result<bool, StoreError>;

    /// Every stored artifact, used to build the index on open
    async fn summaries(&self) -> Result<Vec<ArtifactSummary>, StoreError>;
}

/// Open the backend selected in the configuration
pub async fn open_backend(config: &StorageConfig) -> Result<Arc<dyn ArtifactBackend>, StoreError> {
    let backend: Arc<dyn ArtifactBackend> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryBackend::new()),
        StorageBackend::File => Arc::new(FileBackend::open(&config.directory).await?),
    };
    tracing::info!("Permanent storage backend: {:?}", config.backend);
    Ok(backend)
}
