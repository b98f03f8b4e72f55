//! Health endpoint
//!
//! Liveness is unconditional; `connected` reports whether an AWL session is
//! currently up so probes can distinguish "running" from "serving".

use std::sync::Arc;

use hyper::StatusCode;
use serde::Serialize;

use super::{json_response, RouteResponse};
use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    connected: bool,
    version: &'static str,
    uptime_secs: u64,
}

/// GET /health
pub async fn health(state: &Arc<AppState>) -> RouteResponse {
    let connected = match state.client.read().await.as_ref() {
        Some(client) => client.is_connected().await,
        None => false,
    };
    json_response(
        StatusCode::OK,
        &HealthResponse {
            healthy: true,
            connected,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: state.started.elapsed().as_secs(),
        },
    )
}
