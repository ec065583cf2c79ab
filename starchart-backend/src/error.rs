///! Error types shared across the service boundary
use thiserror::Error;

use crate::model::ValidationError;
use crate::module::cache::GenerationError;
use crate::module::storage::StoreError;

/// Errors surfaced by `StarChartService`.
///
/// Callers can always tell "does not exist" (`NotFound`) apart from
/// "could not be answered" (`StoreUnavailable`, `CacheUnavailable`,
/// `CatalogUnavailable`).
#[derive(Debug, Error)]
pub enum StarChartError {
    #[error("invalid observation: {0}")]
    InvalidObservation(#[from] ValidationError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("storage unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("image cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("star catalog unavailable: {0}")]
    CatalogUnavailable(String),
}

impl StarChartError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StarChartResult<T> = Result<T, StarChartError>;
