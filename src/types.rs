//! Core domain types shared across all RAINWATCH modules.
//!
//! Coordinates, weather records, the batch-wide rain range, batch results,
//! and the error taxonomy for the source, the upstream client and the
//! pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// A labelled point read from the coordinate source.
///
/// Records returned by the weather client carry an empty `place`; the
/// pipeline reattaches the input label after the cache lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    #[serde(default)]
    pub place: String,
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(place: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            place: place.into(),
            lat,
            lon,
        }
    }

    /// An unlabelled point, as reported by the upstream provider.
    pub fn unlabelled(lat: f64, lon: f64) -> Self {
        Self::new(String::new(), lat, lon)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6}, {})", self.lat, self.lon, self.place)
    }
}

// ---------------------------------------------------------------------------
// Weather records
// ---------------------------------------------------------------------------

/// One weather condition entry (e.g. `500 / Rain / light rain`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub id: i64,
    pub main: String,
    pub description: String,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.id, self.main, self.description)
    }
}

/// Rain volume for the last hour, in millimetres (or 0–100 once normalized).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rain {
    #[serde(rename = "1h", default)]
    pub per_hour: f64,
}

/// Current conditions at one point.
///
/// Serializes as `{name, coord, weather, rain: {"1h"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub name: String,
    pub coord: Coordinate,
    #[serde(rename = "weather")]
    pub conditions: Vec<Condition>,
    pub rain: Rain,
}

impl WeatherRecord {
    pub fn rain_per_hour(&self) -> f64 {
        self.rain.per_hour
    }

    /// Copy of this record labelled with `place`.
    pub fn tagged(&self, place: &str) -> Self {
        let mut record = self.clone();
        record.coord.place = place.to_string();
        record
    }
}

impl fmt::Display for WeatherRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conditions: Vec<String> = self.conditions.iter().map(|c| c.to_string()).collect();
        write!(
            f,
            "{} {} [{}] rain/h={:.3}",
            self.name,
            self.coord,
            conditions.join(", "),
            self.rain.per_hour
        )
    }
}

// ---------------------------------------------------------------------------
// Batch aggregation
// ---------------------------------------------------------------------------

/// Running minimum / maximum of hourly rain across a batch.
///
/// Starts at `min = +inf`, `max = 0` and only ever widens, so the final
/// value does not depend on the order in which records arrive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RainRange {
    pub min: f64,
    pub max: f64,
}

impl Default for RainRange {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: 0.0,
        }
    }
}

impl RainRange {
    pub fn observe(&mut self, value: f64) {
        if value > self.max {
            self.max = value;
        }
        if value < self.min {
            self.min = value;
        }
    }

    /// True until at least one value has been observed.
    pub fn is_empty(&self) -> bool {
        self.min.is_infinite()
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

/// How the pipeline reacts to a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole batch on the first failed fetch.
    #[default]
    FailFast,
    /// Record the failure against its coordinate and keep going.
    Partial,
}

/// A coordinate whose fetch failed under [`FailurePolicy::Partial`].
#[derive(Debug, Clone, Serialize)]
pub struct FailedFetch {
    pub coordinate: Coordinate,
    pub error: String,
}

/// The outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Records in input order.
    pub entries: Vec<WeatherRecord>,
    /// Range over the unnormalized values of every successful record.
    pub range: RainRange,
    pub normalized: bool,
    pub failures: Vec<FailedFetch>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// The coordinate source could not be read.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Unable to open coordinate source {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error while reading coordinate source: {0}")]
    Read(#[from] csv::Error),
}

/// A single upstream lookup failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network failure for ({lat}, {lon}): {message}")]
    Network { lat: f64, lon: f64, message: String },

    #[error("Upstream returned status {status} for ({lat}, {lon})")]
    UpstreamStatus { lat: f64, lon: f64, status: u16 },

    #[error("Failed to decode upstream response for ({lat}, {lon}): {message}")]
    Decode { lat: f64, lon: f64, message: String },
}

/// A batch could not be completed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Fetch failed for {place}: {source}")]
    Fetch {
        place: String,
        #[source]
        source: FetchError,
    },

    #[error("Fetch worker failed: {0}")]
    Worker(String),
}

/// Startup configuration is unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} can't be empty")]
    MissingCredential(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
