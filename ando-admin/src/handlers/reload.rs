use crate::server::AdminState;
use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// POST /reload
///
/// Re-runs `PipelineBuilder` over every `ApiSpec` currently in the registry
/// and hot-swaps the compiled result into the data plane's `PipelineRegistry`.
/// Specs present in the admin config but invalid under `PipelineBuilder::validate`
/// are skipped, not fatal -- see `ando_proxy::builder::compile_all`.
pub async fn reload(State(state): State<Arc<AdminState>>) -> Json<Value> {
    state.reload();
    Json(json!({
        "status": "reloaded",
        "apis": state.pipeline_registry.len(),
    }))
}
