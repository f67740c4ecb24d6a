//! Data inputs.
//!
//! Defines the `WeatherSource` trait with its OpenWeatherMap
//! implementation, and the CSV coordinate source that feeds the pipeline.

pub mod coordinates;
pub mod openweathermap;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::types::{FetchError, WeatherRecord};

/// Abstraction over the upstream current-weather provider.
///
/// Implementors perform at most one remote round-trip per call and hold no
/// per-request state, so a single instance is shared by every fetch task.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Fetch current conditions at a point. The returned record's
    /// `coord.place` is always empty.
    async fn fetch(&self, lat: f64, lon: f64) -> Result<WeatherRecord, FetchError>;
}
