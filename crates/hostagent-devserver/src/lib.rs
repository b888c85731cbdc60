//! Development backend for the host agent.
//!
//! Implements the enroll, metrics and inventory endpoints in memory so the
//! agent can be exercised end to end without the real service. Not meant
//! for production: nothing is persisted and tokens live until restart.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const ENROLL_PATH: &str = "/api/telemetry/enroll";
pub const METRICS_PATH: &str = "/api/telemetry/metrics";
pub const INVENTORY_PATH: &str = "/api/telemetry/inventory";

#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Required `X-Enrollment-Token`. Any token is accepted when `None`.
    pub enrollment_token: Option<String>,
    /// Interval overrides handed out in the enrollment policy block.
    pub metrics_interval_sec: u64,
    pub inventory_interval_sec: u64,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            enrollment_token: None,
            metrics_interval_sec: 60,
            inventory_interval_sec: 86_400,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
struct Device {
    device_id: String,
    hostname: Option<String>,
    registered_at: String,
    last_inventory_hash: Option<String>,
    metrics_samples: u64,
    inventories: u64,
}

#[derive(Default)]
struct Registry {
    /// access token -> device
    by_token: HashMap<String, Device>,
    /// hardware fingerprint -> device id, so re-enrollment keeps the id
    by_fingerprint: HashMap<String, String>,
}

/// Shared server state.
struct AppState {
    config: DevServerConfig,
    registry: Mutex<Registry>,
}

fn unauthorized(detail: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"detail": detail}))).into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header(headers, "authorization")?;
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return None;
    }
    Some(token.trim().to_string())
}

fn fingerprint_key(data: &Value) -> Option<String> {
    let fp = data.get("fingerprint")?;
    let uuid = fp.get("hardware_uuid").and_then(Value::as_str);
    let host = fp.get("hostname").and_then(Value::as_str);
    match (uuid, host) {
        (None, None) => None,
        (u, h) => Some(format!("{}|{}", u.unwrap_or(""), h.unwrap_or(""))),
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

async fn handle_enroll(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(expected) = state.config.enrollment_token.as_deref() {
        if header(&headers, "x-enrollment-token") != Some(expected) {
            return unauthorized("invalid enrollment token");
        }
    }

    let data = body.get("data").cloned().unwrap_or(Value::Null);
    let hostname = data
        .pointer("/fingerprint/hostname")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut registry = state.registry.lock().await;
    let device_id = match fingerprint_key(&data) {
        Some(key) => registry
            .by_fingerprint
            .entry(key)
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone(),
        None => Uuid::new_v4().to_string(),
    };
    // A device holds one token at a time.
    registry.by_token.retain(|_, d| d.device_id != device_id);

    let access_token = Uuid::new_v4().simple().to_string();
    let registered_at = now_rfc3339();
    registry.by_token.insert(
        access_token.clone(),
        Device {
            device_id: device_id.clone(),
            hostname,
            registered_at: registered_at.clone(),
            ..Device::default()
        },
    );

    (
        StatusCode::CREATED,
        Json(json!({
            "device_id": device_id,
            "access_token": access_token,
            "registered_at": registered_at,
            "policy": {
                "metrics_interval_sec": state.config.metrics_interval_sec,
                "inventory_interval_sec": state.config.inventory_interval_sec,
            },
        })),
    )
        .into_response()
}

async fn handle_metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return unauthorized("missing bearer token");
    };
    let mut registry = state.registry.lock().await;
    let Some(device) = registry.by_token.get_mut(&token) else {
        return unauthorized("unknown access token");
    };

    let samples = body
        .pointer("/data/samples")
        .and_then(Value::as_array)
        .map_or(0, Vec::len) as u64;
    device.metrics_samples += samples;

    (
        StatusCode::ACCEPTED,
        Json(json!({"accepted": samples, "device_id": device.device_id})),
    )
        .into_response()
}

async fn handle_inventory(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return unauthorized("missing bearer token");
    };
    let mut registry = state.registry.lock().await;
    let Some(device) = registry.by_token.get_mut(&token) else {
        return unauthorized("unknown access token");
    };

    let hash = body
        .pointer("/data/inventory_hash")
        .and_then(Value::as_str)
        .or_else(|| header(&headers, "if-none-match"))
        .map(str::to_string);

    let if_none_match = header(&headers, "if-none-match");
    if if_none_match.is_some() && if_none_match == device.last_inventory_hash.as_deref() {
        return StatusCode::NOT_MODIFIED.into_response();
    }

    device.last_inventory_hash = hash.clone();
    device.inventories += 1;
    (
        StatusCode::CREATED,
        Json(json!({"device_id": device.device_id, "inventory_hash": hash})),
    )
        .into_response()
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registry = state.registry.lock().await;
    Json(json!({"status": "ok", "devices": registry.by_token.len()}))
}

async fn handle_devices(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registry = state.registry.lock().await;
    let mut devices: Vec<&Device> = registry.by_token.values().collect();
    devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    Json(json!({"devices": devices, "total": devices.len()}))
}

/// Build the axum router.
pub fn build_router(config: DevServerConfig) -> Router {
    let state = Arc::new(AppState {
        config,
        registry: Mutex::new(Registry::default()),
    });

    Router::new()
        .route(ENROLL_PATH, post(handle_enroll))
        .route(METRICS_PATH, post(handle_metrics))
        .route(INVENTORY_PATH, post(handle_inventory))
        .route("/health", get(handle_health))
        .route("/devices", get(handle_devices))
        .with_state(state)
}

/// Serve on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, config: DevServerConfig) -> std::io::Result<()> {
    axum::serve(listener, build_router(config)).await
}

/// Bind `host:port` and serve the development backend.
pub async fn run_server(config: DevServerConfig, host: &str, port: u16) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    let local: SocketAddr = listener.local_addr()?;
    eprintln!("hostagent devserver listening on http://{local}");
    serve(listener, config).await
}
