use crate::server::AdminState;
use ando_core::policy::Policy;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// PUT /policies/:id
///
/// Writing a policy does not itself require a pipeline reload -- policies
/// are resolved per-session by `SessionResolver`/`PolicyMerger` at request
/// time, not compiled into the pipeline.
pub async fn put_policy(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    Json(mut body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    body["id"] = json!(id);

    let policy: Policy = match serde_json::from_value(body) {
        Ok(p) => p,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    };

    state.policy_store.put(policy);
    state.persist();

    (StatusCode::OK, Json(json!({"id": id, "status": "created"})))
}

/// GET /policies/:id
pub async fn get_policy(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    match ando_store::PolicyStore::get(&*state.policy_store, &id).await {
        Ok(Some(policy)) => (StatusCode::OK, Json(json!(policy))),
        _ => (StatusCode::NOT_FOUND, Json(json!({"error": "policy not found"}))),
    }
}

/// DELETE /policies/:id
pub async fn delete_policy(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    state.policy_store.remove(&id);
    state.persist();
    (StatusCode::OK, Json(json!({"deleted": true})))
}

/// GET /policies
pub async fn list_policies(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let policies = state.policy_store.all();
    Json(json!({"list": policies, "total": policies.len()}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::test_state;

    fn body(id: &str) -> Value {
        json!({"id": id, "org_id": "org1", "quota": true, "quota_max": 100})
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let state = test_state();
        let (status, _) = put_policy(State(state.clone()), Path("p1".into()), Json(body("p1"))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, Json(got)) = get_policy(State(state.clone()), Path("p1".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(got["id"], "p1");
    }

    #[tokio::test]
    async fn delete_removes_policy() {
        let state = test_state();
        put_policy(State(state.clone()), Path("p1".into()), Json(body("p1"))).await;
        delete_policy(State(state.clone()), Path("p1".into())).await;
        let (status, _) = get_policy(State(state), Path("p1".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
