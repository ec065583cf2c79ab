use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{EphemeralEntry, EphemeralStore};
use crate::model::Fingerprint;

/// In-process ephemeral store
pub struct MemoryStore {
    entries: RwLock<HashMap<Fingerprint, Arc<EphemeralEntry>>>,
    chunk_size: usize,
}

impl MemoryStore {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<EphemeralEntry>>> {
        Ok(self.entries.read().await.get(fingerprint).cloned())
    }

    async fn put(&self, entry: Arc<EphemeralEntry>) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<Fingerprint> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|e| e.created_at < cutoff)
                .map(|e| e.fingerprint.clone())
                .collect()
        };

        let mut removed = 0;
        for chunk in expired.chunks(self.chunk_size) {
            {
                let mut entries = self.entries.write().await;
                for fingerprint in chunk {
                    // Re-check: the entry may have been replaced since the scan
                    if entries
                        .get(fingerprint)
                        .is_some_and(|e| e.created_at < cutoff)
                    {
                        entries.remove(fingerprint);
                        removed += 1;
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
