//! OpenWeatherMap current-weather client.
//!
//! API: `https://api.openweathermap.org/data/2.5/weather`
//! Auth: `appid` query parameter.
//!
//! The response body is decoded into private wire types and mapped to a
//! [`WeatherRecord`]; nothing outside this module sees the wire format.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::WeatherSource;
use crate::types::{Condition, Coordinate, FetchError, Rain, WeatherRecord};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

// ---------------------------------------------------------------------------
// OpenWeatherMap response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CurrentWeatherResponse {
    #[serde(default)]
    name: String,
    coord: WireCoord,
    #[serde(default)]
    weather: Vec<WireCondition>,
    /// Absent when there has been no rain in the last hours.
    #[serde(default)]
    rain: Option<WireRain>,
}

#[derive(Debug, Deserialize)]
struct WireCoord {
    lon: f64,
    lat: f64,
}

#[derive(Debug, Deserialize)]
struct WireCondition {
    id: i64,
    #[serde(default)]
    main: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct WireRain {
    #[serde(rename = "1h", default)]
    one_hour: Option<f64>,
}

impl CurrentWeatherResponse {
    fn into_record(self) -> WeatherRecord {
        WeatherRecord {
            name: self.name,
            coord: Coordinate::unlabelled(self.coord.lat, self.coord.lon),
            conditions: self
                .weather
                .into_iter()
                .map(|w| Condition {
                    id: w.id,
                    main: w.main,
                    description: w.description,
                })
                .collect(),
            rain: Rain {
                per_hour: self.rain.and_then(|r| r.one_hour).unwrap_or(0.0),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenWeatherMapClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl OpenWeatherMapClient {
    pub fn new(
        api_key: SecretString,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
            .user_agent("RAINWATCH/0.1.0")
            .build()
            .context("Failed to build OpenWeatherMap HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherMapClient {
    async fn fetch(&self, lat: f64, lon: f64) -> Result<WeatherRecord, FetchError> {
        debug!(lat, lon, "Requesting current weather");

        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("appid", self.api_key.expose_secret().trim().to_string()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Network {
                lat,
                lon,
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus {
                lat,
                lon,
                status: status.as_u16(),
            });
        }

        // Read the body first so transport and decode failures stay distinct.
        let body = resp.text().await.map_err(|e| FetchError::Network {
            lat,
            lon,
            message: e.to_string(),
        })?;

        let data: CurrentWeatherResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode {
                lat,
                lon,
                message: e.to_string(),
            })?;

        Ok(data.into_record())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
