//! Batch pipeline: coordinates in, weather records out.
//!
//! Pulls coordinates from a stream, resolves each one through the cache or
//! the upstream source on a bounded pool of tokio tasks, tracks the batch
//! rain range as records arrive, then optionally normalizes the complete
//! batch in a second pass. Coordinates sharing a cache key while a fetch
//! for that key is in flight wait for it instead of calling upstream again.

use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use super::cache::{CacheKey, WeatherCache, DEFAULT_KEY_PRECISION};
use super::normalizer;
use crate::data::WeatherSource;
use crate::types::{
    BatchResult, Coordinate, FailedFetch, FailurePolicy, FetchError, PipelineError, RainRange,
    SourceError, WeatherRecord,
};

/// Default bound on simultaneous upstream requests.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrency: usize,
    pub key_precision: u32,
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            key_precision: DEFAULT_KEY_PRECISION,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

type FetchOutcome = (usize, Coordinate, CacheKey, Result<WeatherRecord, FetchError>);

/// Drives one batch at a time over a shared source and cache.
pub struct Pipeline {
    source: Arc<dyn WeatherSource>,
    cache: Arc<WeatherCache>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn WeatherSource>,
        cache: Arc<WeatherCache>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<WeatherCache> {
        &self.cache
    }

    /// Resolve a single coordinate through the cache, labelled with its place.
    pub async fn lookup(&self, coord: &Coordinate) -> Result<WeatherRecord, FetchError> {
        let key = CacheKey::new(coord.lat, coord.lon, self.config.key_precision);
        resolve(&*self.source, &self.cache, coord, key).await
    }

    /// Run one batch.
    ///
    /// Entries come back in input order. A source error always aborts the
    /// batch; a fetch error aborts it under [`FailurePolicy::FailFast`],
    /// cancelling fetches still in flight.
    pub async fn run<S>(&self, mut coordinates: S, normalize: bool) -> Result<BatchResult, PipelineError>
    where
        S: Stream<Item = Result<Coordinate, SourceError>> + Unpin,
    {
        let limit = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<FetchOutcome> = JoinSet::new();
        let mut permit: Option<OwnedSemaphorePermit> = None;
        let mut source_done = false;
        let mut dispatched = 0usize;
        // Keys with a fetch in flight, and the coordinates waiting on each.
        let mut pending: HashMap<CacheKey, Vec<(usize, Coordinate)>> = HashMap::new();

        let mut collected: Vec<(usize, WeatherRecord)> = Vec::new();
        let mut failures: Vec<(usize, FailedFetch)> = Vec::new();
        let mut range = RainRange::default();

        info!(
            max_concurrency = self.config.max_concurrency,
            policy = ?self.config.failure_policy,
            normalize,
            "Starting batch"
        );

        loop {
            tokio::select! {
                biased;

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let (index, coord, key, outcome) = joined.map_err(worker_error)?;
                    let waiters = pending.remove(&key).unwrap_or_default();
                    match outcome {
                        Ok(record) => {
                            range.observe(record.rain_per_hour());
                            for (waiter_index, waiter) in waiters {
                                range.observe(record.rain_per_hour());
                                collected.push((waiter_index, record.tagged(&waiter.place)));
                            }
                            collected.push((index, record));
                        }
                        Err(e) => {
                            warn!(place = %coord.place, lat = coord.lat, lon = coord.lon, error = %e, "Fetch failed");
                            match self.config.failure_policy {
                                // Dropping the JoinSet aborts the remaining fetches.
                                FailurePolicy::FailFast => {
                                    return Err(PipelineError::Fetch { place: coord.place, source: e });
                                }
                                FailurePolicy::Partial => {
                                    let error = e.to_string();
                                    for (waiter_index, waiter) in waiters {
                                        failures.push((
                                            waiter_index,
                                            FailedFetch { coordinate: waiter, error: error.clone() },
                                        ));
                                    }
                                    failures.push((index, FailedFetch { coordinate: coord, error }));
                                }
                            }
                        }
                    }
                }

                acquired = Arc::clone(&limit).acquire_owned(), if permit.is_none() && !source_done => {
                    permit = Some(acquired.map_err(|e| PipelineError::Worker(e.to_string()))?);
                }

                next = coordinates.next(), if permit.is_some() && !source_done => {
                    match next {
                        None => {
                            source_done = true;
                            permit = None;
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(coord)) => {
                            let held = permit.take();
                            let index = dispatched;
                            dispatched += 1;
                            let key = CacheKey::new(coord.lat, coord.lon, self.config.key_precision);

                            if let Some(waiters) = pending.get_mut(&key) {
                                debug!(place = %coord.place, key = %key, "Joining in-flight fetch");
                                waiters.push((index, coord));
                            } else {
                                pending.insert(key, Vec::new());
                                let source = Arc::clone(&self.source);
                                let cache = Arc::clone(&self.cache);
                                tasks.spawn(async move {
                                    let _held = held;
                                    let outcome = resolve(&*source, &cache, &coord, key).await;
                                    (index, coord, key, outcome)
                                });
                            }
                        }
                    }
                }

                else => break,
            }
        }

        collected.sort_by_key(|(index, _)| *index);
        failures.sort_by_key(|(index, _)| *index);
        let mut entries: Vec<WeatherRecord> = collected.into_iter().map(|(_, r)| r).collect();
        let failures: Vec<FailedFetch> = failures.into_iter().map(|(_, f)| f).collect();

        if normalize {
            normalizer::normalize_batch(&mut entries, &range);
        }

        info!(
            dispatched,
            fetched = entries.len(),
            failed = failures.len(),
            rain_min = range.min,
            rain_max = range.max,
            cache_entries = self.cache.len(),
            "Batch complete"
        );

        Ok(BatchResult {
            entries,
            range,
            normalized: normalize,
            failures,
        })
    }
}

/// Cache lookup, upstream fetch on miss, then place reattachment.
///
/// The cache only ever holds unlabelled records, since several input
/// labels can round to the same key.
async fn resolve(
    source: &dyn WeatherSource,
    cache: &WeatherCache,
    coord: &Coordinate,
    key: CacheKey,
) -> Result<WeatherRecord, FetchError> {
    let record = match cache.get(&key) {
        Some(hit) => {
            debug!(place = %coord.place, key = %key, "Cache hit");
            hit
        }
        None => {
            let mut fresh = source.fetch(coord.lat, coord.lon).await?;
            fresh.coord.place.clear();
            cache.put(key, fresh.clone());
            fresh
        }
    };

    Ok(record.tagged(&coord.place))
}

fn worker_error(e: JoinError) -> PipelineError {
    PipelineError::Worker(e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
