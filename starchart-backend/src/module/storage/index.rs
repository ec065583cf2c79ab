use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::model::{quantize, ArtifactId, ArtifactSummary, LocationRange};

const MIN_ID: ArtifactId = ArtifactId::from_uuid(Uuid::nil());
const MAX_ID: ArtifactId = ArtifactId::from_uuid(Uuid::max());

/// Ordered in-memory views over artifact summaries, shared by every backend.
#[derive(Debug, Default)]
pub struct ArtifactIndex {
    summaries: HashMap<ArtifactId, ArtifactSummary>,
    by_created: BTreeSet<(DateTime<Utc>, ArtifactId)>,
    by_observed: BTreeSet<(DateTime<Utc>, ArtifactId)>,
    by_latitude: BTreeSet<(i64, ArtifactId)>,
}

impl ArtifactIndex {
    pub fn from_summaries(summaries: impl IntoIterator<Item = ArtifactSummary>) -> Self {
        let mut index = Self::default();
        for summary in summaries {
            index.insert(summary);
        }
        index
    }

    /// Insert or replace
    pub fn insert(&mut self, summary: ArtifactSummary) {
        self.remove(&summary.id);
        let id = summary.id;
        self.by_created.insert((summary.created_at, id));
        self.by_observed.insert((summary.observed_at.to_utc(), id));
        self.by_latitude.insert((quantize(summary.latitude), id));
        self.summaries.insert(id, summary);
    }

    pub fn remove(&mut self, id: &ArtifactId) -> Option<ArtifactSummary> {
        let summary = self.summaries.remove(id)?;
        self.by_created.remove(&(summary.created_at, *id));
        self.by_observed.remove(&(summary.observed_at.to_utc(), *id));
        self.by_latitude.remove(&(quantize(summary.latitude), *id));
        Some(summary)
    }

    pub fn get(&self, id: &ArtifactId) -> Option<&ArtifactSummary> {
        self.summaries.get(id)
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    /// Most recently created first
    pub fn page(&self, offset: usize, limit: usize) -> Vec<ArtifactSummary> {
        self.by_created
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|(_, id)| self.summaries.get(id).cloned())
            .collect()
    }

    /// Artifacts inside an inclusive latitude/longitude box, south to north
    pub fn in_location(&self, range: &LocationRange) -> Vec<ArtifactSummary> {
        if range.min_latitude > range.max_latitude {
            return Vec::new();
        }
        let lower = (quantize(range.min_latitude), MIN_ID);
        let upper = (quantize(range.max_latitude), MAX_ID);
        self.by_latitude
            .range(lower..=upper)
            .filter_map(|(_, id)| self.summaries.get(id))
            .filter(|s| range.contains(s.latitude, s.longitude))
            .cloned()
            .collect()
    }

    /// Artifacts observed within `[from, to]`, oldest first
    pub fn observed_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<ArtifactSummary> {
        if from > to {
            return Vec::new();
        }
        self.by_observed
            .range((from, MIN_ID)..=(to, MAX_ID))
            .filter_map(|(_, id)| self.summaries.get(id).cloned())
            .collect()
    }
}
