//! §4.H HTTP Bridge: the local HTTP surface (`/status`, `/telemetry`,
//! `/execute_plan`, `/stop`, `/pi_vision_step`) that mediates UI/agent
//! calls into the core. Built on axum, grounded in style on
//! `adamtc007-ob-poc`'s `client_routes.rs`/`agentic_server.rs` (the only
//! pack example carrying an axum + tower-http stack); the endpoint
//! contracts themselves are grounded on `test_http_bridge.py` and
//! `pi_vision_brain_server.py` in `original_source/`.

use crate::catalog::Catalog;
use crate::executor::Executor;
use crate::planner::PlannerAdapter;
use crate::session::NodeSession;
use crate::validator::validate_plan;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use daemon_protocol::correlation::new_correlation_id;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const CORRELATION_HEADER: &str = "x-correlation-id";

pub struct AppState {
    pub sessions: Vec<Arc<NodeSession>>,
    pub catalog: RwLock<Catalog>,
    pub executor: Executor,
    pub planner: PlannerAdapter,
    pub vision_brain_url: Option<String>,
    pub http: reqwest::Client,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/status", get(status))
        .route("/telemetry", get(telemetry))
        .route("/execute_plan", post(execute_plan))
        .route("/stop", post(stop))
        .route("/pi_vision_step", post(pi_vision_step))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| new_correlation_id("req"))
}

fn with_correlation(correlation_id: &str, mut response: Response) -> Response {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    response
}

async fn merged_manifest(state: &AppState) -> Value {
    let catalog = state.catalog.read().await;
    let nodes: Vec<Value> = catalog
        .entries()
        .iter()
        .map(|entry| {
            json!({
                "name": entry.alias,
                "node_id": entry.node_id,
                "display_name": entry.node_name,
                "commands": entry.manifest.commands,
                "telemetry": entry.manifest.telemetry,
                "services": entry.manifest.services,
            })
        })
        .collect();
    json!({
        "daemon_version": "0.1",
        "nodes": nodes,
        "catalog": {
            "qualified": catalog.qualified_keys(),
            "unqualified": catalog.unqualified_keys(),
        },
    })
}

async fn status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cid = correlation_id(&headers);
    let mut nodes = Vec::with_capacity(state.sessions.len());
    for session in &state.sessions {
        let connected = session.is_connected().await;
        nodes.push(json!({
            "alias": session.alias,
            "host": session.host,
            "port": session.port,
            "connected": connected,
            "node_id": session.node_id().await,
        }));
    }
    let system_manifest = merged_manifest(&state).await;
    let body = json!({"ok": true, "nodes": nodes, "system_manifest": system_manifest});
    with_correlation(&cid, Json(body).into_response())
}

async fn telemetry(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cid = correlation_id(&headers);
    let mut snapshot = serde_json::Map::new();
    for session in &state.sessions {
        let values = session.telemetry_snapshot().await;
        snapshot.insert(session.alias.clone(), json!(values));
    }
    let body = json!({"ok": true, "telemetry_snapshot": Value::Object(snapshot)});
    with_correlation(&cid, Json(body).into_response())
}

async fn execute_plan(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Option<Json<Value>>) -> Response {
    let cid = correlation_id(&headers);
    let Some(Json(raw)) = body else {
        return with_correlation(&cid, bad_request(&cid, "request body must be a JSON object"));
    };

    let plan = {
        let catalog = state.catalog.read().await;
        match validate_plan(&raw, &catalog) {
            Ok(plan) => plan,
            Err(error) => return with_correlation(&cid, bad_request(&cid, &error)),
        }
    };

    let catalog = state.catalog.read().await;
    match state.executor.execute_plan(&plan, &catalog, &cid).await {
        Ok(()) => {
            info!(correlation_id = %cid, "plan executed");
            with_correlation(&cid, Json(json!({"ok": true, "correlation_id": cid})).into_response())
        }
        Err(err) => with_correlation(&cid, bad_request(&cid, &err.to_string())),
    }
}

async fn stop(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cid = correlation_id(&headers);
    let errors = state.executor.emergency_stop(&cid).await;
    if !errors.is_empty() {
        warn!(correlation_id = %cid, errors = ?errors, "emergency stop reported failures (best-effort)");
    }
    with_correlation(&cid, Json(json!({"ok": true, "correlation_id": cid})).into_response())
}

async fn pi_vision_step(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Option<Json<Value>>) -> Response {
    let cid = correlation_id(&headers);
    let Some(url) = state.vision_brain_url.clone() else {
        return with_correlation(&cid, bad_request(&cid, "no vision brain configured"));
    };
    let Some(Json(mut payload)) = body else {
        return with_correlation(&cid, bad_request(&cid, "request body must be a JSON object"));
    };

    if let Some(obj) = payload.as_object_mut() {
        obj.entry("system_manifest").or_insert(merged_manifest(&state).await);
        obj.entry("correlation_id").or_insert(json!(cid));
    }

    let sent = state
        .http
        .post(&url)
        .timeout(Duration::from_secs(10))
        .header("X-Correlation-Id", &cid)
        .json(&payload)
        .send()
        .await;

    match sent {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let brain_body: Value = response
                .json()
                .await
                .unwrap_or_else(|_| json!({"error": "invalid_response", "message": "brain response was not JSON"}));
            with_correlation(&cid, (status, Json(brain_body)).into_response())
        }
        Err(err) => with_correlation(
            &cid,
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "brain_unreachable", "message": err.to_string(), "correlation_id": cid})),
            )
                .into_response(),
        ),
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"ok": false, "error": "not_found"}))).into_response()
}

fn bad_request(correlation_id: &str, error: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"ok": false, "error": error, "correlation_id": correlation_id})),
    )
        .into_response()
}
