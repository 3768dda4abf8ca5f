use crate::server::AdminState;
use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": "ando-ce-monoio"
    }))
}

/// Prometheus text exposition. Empty body when the collector wasn't built
/// (e.g. `observability.prometheus.enabled = false`).
pub async fn metrics(State(state): State<Arc<AdminState>>) -> String {
    state.metrics.as_ref().map(|m| m.gather_text()).unwrap_or_default()
}
