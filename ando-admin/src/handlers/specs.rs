use crate::server::AdminState;
use ando_core::spec::ApiSpec;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// PUT /apis/:id
pub async fn put_spec(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    Json(mut body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    body["api_id"] = json!(id);

    let spec: ApiSpec = match serde_json::from_value(body) {
        Ok(s) => s,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    };

    state.spec_registry.insert(spec);
    state.reload();
    state.persist();

    (StatusCode::OK, Json(json!({"api_id": id, "status": "created"})))
}

/// GET /apis/:id
pub async fn get_spec(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    match state.spec_registry.get(&id) {
        Some(spec) => (StatusCode::OK, Json(json!(&*spec))),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "api spec not found"}))),
    }
}

/// DELETE /apis/:id
pub async fn delete_spec(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    state.spec_registry.remove(&id);
    state.reload();
    state.persist();
    (StatusCode::OK, Json(json!({"deleted": true})))
}

/// GET /apis
pub async fn list_specs(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let specs: Vec<ApiSpec> = state.spec_registry.all().iter().map(|s| (**s).clone()).collect();
    Json(json!({"list": specs, "total": specs.len()}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::test_state;

    fn body(id: &str) -> Value {
        json!({
            "api_id": id,
            "org_id": "org1",
            "listen_path": "/foo",
            "target_url": "http://backend.local",
        })
    }

    #[tokio::test]
    async fn put_then_get_round_trips_and_reloads_pipelines() {
        let state = test_state();
        let (status, _) = put_spec(State(state.clone()), Path("api1".into()), Json(body("api1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.pipeline_registry.len(), 1);

        let (status, Json(got)) = get_spec(State(state.clone()), Path("api1".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(got["api_id"], "api1");
    }

    #[tokio::test]
    async fn delete_removes_from_registry_and_reloads() {
        let state = test_state();
        put_spec(State(state.clone()), Path("api1".into()), Json(body("api1"))).await;
        let (status, _) = delete_spec(State(state.clone()), Path("api1".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.spec_registry.get("api1").is_none());
        assert!(state.pipeline_registry.is_empty());
    }

    #[tokio::test]
    async fn get_missing_returns_404() {
        let state = test_state();
        let (status, _) = get_spec(State(state), Path("missing".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
