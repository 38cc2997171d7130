use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::response::json_ok;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/live", get(live))
        .route("/info", get(info))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthData {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
    active_sessions: usize,
}

async fn root(State(state): State<AppState>) -> Response {
    json_ok(HealthData {
        status: "ok",
        uptime_seconds: state.uptime_seconds(),
    })
}

async fn live() -> Response {
    json_ok(serde_json::json!({ "alive": true }))
}

async fn info(State(state): State<AppState>) -> Response {
    json_ok(HealthInfo {
        service: "lexikon-srs",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.sessions().len().await,
    })
}
