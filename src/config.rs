//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! field has a default, so a partial file (or none at all) is valid. The
//! upstream API key is referenced by env-var name and resolved at startup.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::data::openweathermap::DEFAULT_BASE_URL;
use crate::engine::cache::{DEFAULT_KEY_PRECISION, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
use crate::engine::pipeline::{PipelineConfig, DEFAULT_MAX_CONCURRENCY};
use crate::types::{ConfigError, FailurePolicy};

/// Largest supported cache key precision (keeps scaled coordinates in i64).
const MAX_KEY_PRECISION: u32 = 9;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub weather: WeatherConfig,
    pub cache: CacheConfig,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/data.csv"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: "OPENWEATHERMAP_API_KEY".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub key_precision: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL.as_secs(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            key_precision: DEFAULT_KEY_PRECISION,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_concurrency must be at least 1".into(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Invalid("cache.ttl_secs must be positive".into()));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache.sweep_interval_secs must be positive".into(),
            ));
        }
        if self.cache.key_precision > MAX_KEY_PRECISION {
            return Err(ConfigError::Invalid(format!(
                "cache.key_precision must be at most {MAX_KEY_PRECISION}"
            )));
        }
        if self.weather.timeout_secs == 0 {
            return Err(ConfigError::Invalid("weather.timeout_secs must be positive".into()));
        }
        if self.weather.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("weather.base_url can't be empty".into()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.weather.timeout_secs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_concurrency: self.pipeline.max_concurrency,
            key_precision: self.cache.key_precision,
            failure_policy: self.pipeline.failure_policy,
        }
    }

    /// Resolve the upstream API key from the environment.
    pub fn api_key(&self) -> Result<SecretString, ConfigError> {
        Self::resolve_secret(&self.weather.api_key_env)
    }

    /// Resolve an environment variable name to a non-empty secret.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString, ConfigError> {
        let value = std::env::var(env_name).unwrap_or_default();
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigError::MissingCredential(env_name.to_string()));
        }
        Ok(SecretString::new(value.to_string()))
    }
}
