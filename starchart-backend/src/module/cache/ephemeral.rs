///! Single-flight cache front
///!
///! At most one generation runs per fingerprint. Callers that arrive while a
///! generation is running wait on the same shared future. The generation runs
///! on its own task, so a caller that stops waiting does not cancel it.
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{CacheLookup, CacheSource, EphemeralEntry, EphemeralStore, GenerationError};
use crate::model::{Fingerprint, Observation};
use crate::module::clock::Clock;

/// Entry plus whether this flight actually ran the generator
type FlightOutput = Result<(Arc<EphemeralEntry>, bool), GenerationError>;
type Flight = Shared<BoxFuture<'static, FlightOutput>>;

struct CacheInner {
    store: Arc<dyn EphemeralStore>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashMap<Fingerprint, (u64, Flight)>>,
    next_flight: AtomicU64,
}

impl CacheInner {
    fn flights(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, (u64, Flight)>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the in-flight slot when the generation task ends, including on
/// panic.
struct FlightSlot {
    inner: Arc<CacheInner>,
    fingerprint: Fingerprint,
    id: u64,
}

impl Drop for FlightSlot {
    fn drop(&mut self) {
        let mut flights = self.inner.flights();
        if flights
            .get(&self.fingerprint)
            .is_some_and(|(id, _)| *id == self.id)
        {
            flights.remove(&self.fingerprint);
        }
    }
}

#[derive(Clone)]
pub struct EphemeralCache {
    inner: Arc<CacheInner>,
}

impl EphemeralCache {
    pub fn new(store: Arc<dyn EphemeralStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                clock,
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<EphemeralEntry>>> {
        self.inner.store.get(fingerprint).await
    }

    /// Store bytes directly, stamped with the current time. The entry id is
    /// the fingerprint.
    pub async fn put(
        &self,
        fingerprint: Fingerprint,
        observation: Observation,
        bytes: Vec<u8>,
    ) -> Result<Fingerprint> {
        let entry = Arc::new(EphemeralEntry {
            fingerprint: fingerprint.clone(),
            observation,
            bytes,
            created_at: self.inner.clock.now(),
        });
        self.inner.store.put(entry).await?;
        Ok(fingerprint)
    }

    /// Remove entries created strictly before `cutoff`
    pub async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.store.expire_before(cutoff).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.inner.store.len().await
    }

    /// Generations currently running
    pub fn in_flight(&self) -> usize {
        self.inner.flights().len()
    }

    /// Return the stored entry, or run `generate` once for all concurrent
    /// callers of the same fingerprint. A failed generation is reported to
    /// every waiter and not cached.
    pub async fn get_or_generate<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        observation: &Observation,
        generate: F,
    ) -> Result<CacheLookup, GenerationError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        match self.inner.store.get(fingerprint).await {
            Ok(Some(entry)) => {
                return Ok(CacheLookup {
                    entry,
                    source: CacheSource::Cached,
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Ephemeral store read failed for {}: {:#}", fingerprint, e),
        }

        let (flight, leader) = {
            let mut flights = self.inner.flights();
            match flights.get(fingerprint) {
                Some((_, flight)) => (flight.clone(), false),
                None => {
                    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let flight =
                        self.spawn_flight(id, fingerprint.clone(), observation.clone(), generate);
                    flights.insert(fingerprint.clone(), (id, flight.clone()));
                    (flight, true)
                }
            }
        };

        let (entry, rendered) = flight.await?;
        let source = match (leader, rendered) {
            (true, true) => CacheSource::Generated,
            (true, false) => CacheSource::Cached,
            (false, _) => CacheSource::Joined,
        };
        Ok(CacheLookup { entry, source })
    }

    fn spawn_flight<F, Fut>(
        &self,
        id: u64,
        fingerprint: Fingerprint,
        observation: Observation,
        generate: F,
    ) -> Flight
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let _slot = FlightSlot {
                inner: inner.clone(),
                fingerprint: fingerprint.clone(),
                id,
            };
            run_flight(&inner, fingerprint, observation, generate).await
        });

        async move {
            match handle.await {
                Ok(output) => output,
                Err(e) => Err(GenerationError::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared()
    }
}

async fn run_flight<F, Fut>(
    inner: &CacheInner,
    fingerprint: Fingerprint,
    observation: Observation,
    generate: F,
) -> FlightOutput
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<u8>>>,
{
    // A generation may have finished between the caller's lookup and the
    // slot registration.
    if let Ok(Some(entry)) = inner.store.get(&fingerprint).await {
        return Ok((entry, false));
    }

    tracing::debug!("Generating star map {}", fingerprint);
    let bytes = generate().await.map_err(|e| {
        tracing::error!("Star map generation failed for {}: {:#}", fingerprint, e);
        GenerationError::Render(format!("{:#}", e))
    })?;

    let entry = Arc::new(EphemeralEntry {
        fingerprint,
        observation,
        bytes,
        created_at: inner.clock.now(),
    });

    // Entry must be visible in the store before the slot is released
    if let Err(e) = inner.store.put(entry.clone()).await {
        tracing::warn!("Failed to cache star map {}: {:#}", entry.fingerprint, e);
    }

    Ok((entry, true))
}
