//! Model catalog passthrough.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tokio::time::timeout;
use tracing::error;

use crate::gateway::GatewayError;
use crate::response::GatewayResponse;
use crate::server::AppState;
use crate::upstream::UpstreamError;

/// GET /api/models
pub async fn list_models(State(state): State<AppState>) -> Response {
    let listing = timeout(state.request_timeout, state.upstream.list_models())
        .await
        .unwrap_or_else(|_| Err(UpstreamError::Timeout(state.request_timeout)));

    match listing {
        Ok(catalog) => GatewayResponse::ok(catalog).into_response(),
        Err(err) => {
            error!(error = %err, "Failed to fetch model catalog");
            GatewayError::ModelsUnavailable(err).into_response()
        }
    }
}
