//! API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

use crate::data::coordinates::{self, DEFAULT_STREAM_BUFFER};
use crate::engine::cache::CacheStats;
use crate::engine::pipeline::Pipeline;
use crate::types::{PipelineError, SourceError, WeatherRecord};

/// Header carrying the number of coordinates that could not be fetched.
pub const FAILED_COORDINATES_HEADER: &str = "x-failed-coordinates";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub pipeline: Pipeline,
    pub source_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(pipeline: Pipeline, source_path: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            source_path: source_path.into(),
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct DataQuery {
    #[serde(default)]
    pub scale: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub started_at: String,
    pub uptime_secs: i64,
    pub cache: CacheStats,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// A failed batch, rendered as `{"error": ...}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl From<SourceError> for ApiError {
    fn from(e: SourceError) -> Self {
        Self(PipelineError::Source(e))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::Source(_) | PipelineError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        error!(status = status.as_u16(), error = %self.0, "Batch request failed");
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

/// Boolean query flag: `1 t T TRUE true True` are true; anything else,
/// including a missing or unparseable value, is false.
pub fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(str::trim),
        Some("1" | "t" | "T" | "TRUE" | "true" | "True")
    )
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/data?scale=<bool>
pub async fn get_data(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> Result<Response, ApiError> {
    let normalize = parse_flag(query.scale.as_deref());
    let coords = coordinates::stream(&state.source_path, DEFAULT_STREAM_BUFFER)?;
    let batch = state.pipeline.run(coords, normalize).await?;

    let failed = batch.failures.len();
    let entries: Vec<WeatherRecord> = batch.entries;
    let mut response = Json(entries).into_response();
    if failed > 0 {
        response
            .headers_mut()
            .insert(FAILED_COORDINATES_HEADER, HeaderValue::from(failed));
    }
    Ok(response)
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        started_at: state.started_at.to_rfc3339(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        cache: state.pipeline.cache().stats(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
