//! Generation endpoint.

use std::net::SocketAddr;

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::time::timeout;
use tracing::{Instrument, error, field, info_span, warn};
use ulid::Ulid;

use crate::gateway::{GatewayError, INVALID_BODY_MESSAGE};
use crate::response;
use crate::server::AppState;
use crate::upstream::UpstreamError;

const UNKNOWN_CLIENT: &str = "unknown";

/// POST /api/generate
pub async fn generate(State(state): State<AppState>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer);
    let span = info_span!(
        "generate",
        request_id = %Ulid::new(),
        client = %client,
        task = field::Empty,
    );

    async move {
        if let Err(err) = state.gateway.admit(&client) {
            return err.into_response();
        }

        let work = async {
            let body = match read_body(request.into_body(), state.max_body_bytes).await {
                Ok(body) => body,
                Err(response) => return response,
            };
            match state.gateway.respond(&body).await {
                Ok(result) => result.into_response(),
                Err(err) => err.into_response(),
            }
        };

        match timeout(state.request_timeout, work).await {
            Ok(response) => response,
            Err(_) => {
                error!(deadline = ?state.request_timeout, "Request deadline exceeded");
                GatewayError::Upstream(UpstreamError::Timeout(state.request_timeout))
                    .into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn read_body(body: Body, limit: usize) -> Result<axum::body::Bytes, Response> {
    to_bytes(body, limit).await.map_err(|err| {
        warn!(error = %err, "Failed to read request body");
        response::error(StatusCode::BAD_REQUEST, INVALID_BODY_MESSAGE)
    })
}

/// Identify the caller: first `X-Forwarded-For` hop, then `X-Real-IP`, then
/// the socket peer.
pub(crate) fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
