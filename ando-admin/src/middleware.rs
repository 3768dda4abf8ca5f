use crate::server::AdminState;
use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Admin API key authentication middleware. Only mounted when
/// `AdminState::api_key` is set -- `start_admin` skips this layer
/// entirely otherwise.
pub async fn api_key_auth(
    State(state): State<Arc<AdminState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = &state.api_key else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get("x-ando-authorization")
        .and_then(|v| v.to_str().ok());

    if presented == Some(expected.as_str()) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
