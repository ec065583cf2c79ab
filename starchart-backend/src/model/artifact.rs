///! Permanently archived star maps
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Free-form structured metadata attached to an artifact
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Durable artifact identifier, independent of the render fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// Time-ordered id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ArtifactId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ArtifactId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A promoted star map
#[derive(Debug, Clone, PartialEq)]
pub struct PermanentArtifact {
    pub id: ArtifactId,
    pub latitude: f64,
    pub longitude: f64,
    /// Observation instant with the observer's original offset
    pub observed_at: DateTime<FixedOffset>,
    pub title: Option<String>,
    pub image: Vec<u8>,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PermanentArtifact {
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            id: self.id,
            latitude: self.latitude,
            longitude: self.longitude,
            observed_at: self.observed_at,
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Artifact without image bytes or metadata, used for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub id: ArtifactId,
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: DateTime<FixedOffset>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One page of a most-recent-first listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPage {
    pub items: Vec<ArtifactSummary>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Inclusive latitude/longitude box, in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationRange {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl LocationRange {
    /// Box of `radius_deg` around a point
    pub fn around(latitude: f64, longitude: f64, radius_deg: f64) -> Self {
        Self {
            min_latitude: latitude - radius_deg,
            max_latitude: latitude + radius_deg,
            min_longitude: longitude - radius_deg,
            max_longitude: longitude + radius_deg,
        }
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && (self.min_longitude..=self.max_longitude).contains(&longitude)
    }
}
