use crate::server::AdminState;
use ando_core::consumer::Consumer;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// PUT /consumers/:id
///
/// Consumers are admin-plane metadata only -- `SessionResolver` never
/// consults this store. Writing one here does not require a reload.
pub async fn put_consumer(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    Json(mut body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    body["id"] = json!(id);

    let consumer: Consumer = match serde_json::from_value(body) {
        Ok(c) => c,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))),
    };

    state.consumer_store.put(consumer);
    state.persist();

    (StatusCode::OK, Json(json!({"id": id, "status": "created"})))
}

/// GET /consumers/:id
pub async fn get_consumer(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    match ando_store::ConsumerStore::get(&*state.consumer_store, &id).await {
        Ok(Some(consumer)) => (StatusCode::OK, Json(json!(consumer))),
        _ => (StatusCode::NOT_FOUND, Json(json!({"error": "consumer not found"}))),
    }
}

/// DELETE /consumers/:id
pub async fn delete_consumer(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    state.consumer_store.remove(&id);
    state.persist();
    (StatusCode::OK, Json(json!({"deleted": true})))
}

/// GET /consumers
pub async fn list_consumers(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let consumers = state.consumer_store.all();
    Json(json!({"list": consumers, "total": consumers.len()}))
}
