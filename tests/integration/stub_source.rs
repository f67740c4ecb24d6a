//! Stub weather source for integration testing.
//!
//! Provides a deterministic `WeatherSource` that reports rain equal to the
//! requested latitude, can be told to fail at chosen latitudes, and records
//! call counts and peak concurrency, all in-memory.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rainwatch::data::WeatherSource;
use rainwatch::types::{Condition, Coordinate, FetchError, Rain, WeatherRecord};

type DelayFn = dyn Fn(f64) -> Duration + Send + Sync;

/// A stub upstream for deterministic pipeline tests.
pub struct StubSource {
    delay: Box<DelayFn>,
    /// Latitudes that answer with the given upstream status.
    failing: Mutex<Vec<(f64, u16)>>,
    calls: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubSource {
    pub fn new() -> Arc<Self> {
        Self::with_delay(|_| Duration::ZERO)
    }

    /// Sleep `delay(lat)` before answering.
    pub fn with_delay(delay: impl Fn(f64) -> Duration + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            delay: Box::new(delay),
            failing: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Answer requests for `lat` with an upstream error status.
    pub fn fail_at(&self, lat: f64, status: u16) {
        self.failing.lock().unwrap().push((lat, status));
    }

    /// Requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests answered successfully.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Highest number of requests observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the request future is aborted.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WeatherSource for StubSource {
    async fn fetch(&self, lat: f64, lon: f64) -> Result<WeatherRecord, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let failure = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .find(|(l, _)| *l == lat)
            .map(|(_, status)| *status);
        if let Some(status) = failure {
            return Err(FetchError::UpstreamStatus { lat, lon, status });
        }

        let delay = (self.delay)(lat);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(WeatherRecord {
            name: format!("Stub {lat:.2}"),
            coord: Coordinate::unlabelled(lat, lon),
            conditions: vec![Condition {
                id: 500,
                main: "Rain".into(),
                description: "light rain".into(),
            }],
            rain: Rain { per_hour: lat },
        })
    }
}
