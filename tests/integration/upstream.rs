//! OpenWeatherMap client and full HTTP round-trips against a local fake
//! upstream served by axum.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use secrecy::SecretString;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use rainwatch::api::{build_router, routes::ApiState};
use rainwatch::data::openweathermap::OpenWeatherMapClient;
use rainwatch::data::WeatherSource;
use rainwatch::engine::cache::WeatherCache;
use rainwatch::engine::pipeline::{Pipeline, PipelineConfig};
use rainwatch::types::FetchError;

const API_KEY: &str = "test-key";
/// Latitude at which the fake upstream answers with a non-JSON body.
const GARBLED_LAT: f64 = 13.0;
/// Latitude at which the fake upstream omits the `rain` block.
const DRY_LAT: f64 = 50.0;

// ---------------------------------------------------------------------------
// Fake upstream
// ---------------------------------------------------------------------------

async fn current_weather(
    State(hits): State<Arc<AtomicUsize>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);

    if params.get("appid").map(String::as_str) != Some(API_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"cod": 401, "message": "Invalid API key"})),
        )
            .into_response();
    }

    let lat: f64 = params.get("lat").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let lon: f64 = params.get("lon").and_then(|v| v.parse().ok()).unwrap_or(0.0);

    if lat == GARBLED_LAT {
        return (StatusCode::OK, "<html>maintenance</html>").into_response();
    }

    let mut body = json!({
        "coord": {"lon": lon, "lat": lat},
        "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
        "name": format!("Fake {lat}"),
        "cod": 200
    });
    if lat != DRY_LAT {
        body["rain"] = json!({"1h": lat / 10.0});
    }
    Json(body).into_response()
}

/// Start the fake upstream; returns its weather URL and hit counter.
async fn spawn_upstream() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/data/2.5/weather", get(current_weather))
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/data/2.5/weather"), hits)
}

fn client(base_url: String, key: &str) -> OpenWeatherMapClient {
    OpenWeatherMapClient::new(
        SecretString::new(key.to_string()),
        Some(base_url),
        Some(Duration::from_secs(5)),
    )
    .unwrap()
}

fn temp_csv(contents: &str) -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("rainwatch_upstream_{}.csv", uuid::Uuid::new_v4()));
    std::fs::write(&p, contents).unwrap();
    p
}

// ---------------------------------------------------------------------------
// Client tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_decodes_current_weather() {
    let (url, hits) = spawn_upstream().await;
    let record = client(url, API_KEY).fetch(20.0, 30.0).await.unwrap();

    assert_eq!(record.name, "Fake 20");
    assert_eq!(record.coord.lat, 20.0);
    assert_eq!(record.coord.lon, 30.0);
    assert!(record.coord.place.is_empty());
    assert_eq!(record.conditions[0].main, "Rain");
    assert!((record.rain_per_hour() - 2.0).abs() < 1e-9);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_reports_status_errors() {
    let (url, _) = spawn_upstream().await;
    let err = client(url, "wrong-key").fetch(1.0, 1.0).await.unwrap_err();
    assert!(matches!(err, FetchError::UpstreamStatus { status: 401, .. }));
}

#[tokio::test]
async fn client_reports_decode_errors() {
    let (url, _) = spawn_upstream().await;
    let err = client(url, API_KEY).fetch(GARBLED_LAT, 1.0).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode { .. }));
}

#[tokio::test]
async fn client_treats_missing_rain_as_zero() {
    let (url, _) = spawn_upstream().await;
    let record = client(url, API_KEY).fetch(DRY_LAT, 1.0).await.unwrap();
    assert_eq!(record.rain_per_hour(), 0.0);
}

#[tokio::test]
async fn client_reports_network_errors() {
    // Grab a free port, then close it so nothing is listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(format!("http://{addr}/data/2.5/weather"), API_KEY)
        .fetch(1.0, 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Network { .. }));
}

// ---------------------------------------------------------------------------
// Full round-trip
// ---------------------------------------------------------------------------

async fn get_data(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn api_scales_and_caches_across_requests() {
    let (url, hits) = spawn_upstream().await;
    let path = temp_csv("Low, 10.0, 5.0\nbroken, ?, 5.0\nMid, 20.0, 5.0\nHigh, 30.0, 5.0\n");

    let pipeline = Pipeline::new(
        Arc::new(client(url, API_KEY)),
        Arc::new(WeatherCache::default()),
        PipelineConfig::default(),
    );
    let app = build_router(Arc::new(ApiState::new(pipeline, path.clone())));

    let (status, raw) = get_data(app.clone(), "/api/data").await;
    assert_eq!(status, StatusCode::OK);
    let raw = raw.as_array().unwrap();
    assert_eq!(raw.len(), 3);
    assert_eq!(raw[0]["coord"]["place"], "Low");
    assert_eq!(raw[2]["rain"]["1h"], 3.0);

    let (status, scaled) = get_data(app, "/api/data?scale=1").await;
    assert_eq!(status, StatusCode::OK);
    let rain: Vec<f64> = scaled
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["rain"]["1h"].as_f64().unwrap())
        .collect();
    assert_eq!(rain, vec![0.0, 50.0, 100.0]);

    // Second request served entirely from the cache.
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn api_surfaces_upstream_failure() {
    let (url, _) = spawn_upstream().await;
    let path = temp_csv("Good, 10.0, 5.0\nBad, 13.0, 5.0\n");

    let pipeline = Pipeline::new(
        Arc::new(client(url, API_KEY)),
        Arc::new(WeatherCache::default()),
        PipelineConfig::default(),
    );
    let app = build_router(Arc::new(ApiState::new(pipeline, path.clone())));

    let (status, body) = get_data(app, "/api/data").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("Bad"));
    std::fs::remove_file(path).ok();
}
