//! RAINWATCH — batch current-weather lookup with normalized rainfall.
//!
//! Entry point. Loads `.env` and configuration, initialises structured
//! logging, validates the upstream credential, wires the client, cache
//! and pipeline together, and serves the HTTP API until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use rainwatch::api::{self, routes::ApiState};
use rainwatch::config::AppConfig;
use rainwatch::data::openweathermap::OpenWeatherMapClient;
use rainwatch::engine::cache::WeatherCache;
use rainwatch::engine::pipeline::Pipeline;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let config_path =
        std::env::var("RAINWATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load_or_default(&config_path)?;
    cfg.validate()?;

    // Fatal before serving anything.
    let api_key = cfg.api_key()?;

    info!(
        config = %config_path,
        source = %cfg.source.path.display(),
        upstream = %cfg.weather.base_url,
        ttl_secs = cfg.cache.ttl_secs,
        max_concurrency = cfg.pipeline.max_concurrency,
        policy = ?cfg.pipeline.failure_policy,
        "RAINWATCH starting up"
    );

    if !cfg.source.path.exists() {
        warn!(path = %cfg.source.path.display(), "Coordinate file not found; requests will fail until it exists");
    }

    let client = OpenWeatherMapClient::new(
        api_key,
        Some(cfg.weather.base_url.clone()),
        Some(cfg.request_timeout()),
    )
    .context("Failed to initialise weather client")?;

    let cache = Arc::new(WeatherCache::new(cfg.cache_ttl(), cfg.sweep_interval()));
    let sweeper = cache.spawn_sweeper();

    let pipeline = Pipeline::new(Arc::new(client), cache, cfg.pipeline_config());
    let state = Arc::new(ApiState::new(pipeline, cfg.source.path.clone()));

    api::serve(state, cfg.listen_addr(), shutdown_signal()).await?;

    sweeper.abort();
    info!("RAINWATCH shut down cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rainwatch=info,tower_http=info"));

    let json_logging = std::env::var("RAINWATCH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
