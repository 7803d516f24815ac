//! Gateway request pipeline.
//!
//! ```text
//! received ──▶ rate_checked ──▶ dispatched ──┬──▶ normal ────┬──▶ responded
//!     │              │                       │               │
//!     │              │                       └──▶ fallback ──┘
//!   429 ◀────────────┘ 400 ◀── bad body / type
//! ```
//!
//! A primary outcome classified [`ErrorClass::NotFound`] on a fallback-eligible
//! task gets exactly one retry through the fallback transport. Every other
//! failure, including a failed fallback, becomes a sanitized 500.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{Span, error, info, warn};

use crate::normalize::normalize;
use crate::ratelimit::{RateLimitPolicy, RateLimiter};
use crate::response::{self, GatewayResponse};
use crate::upstream::{ErrorClass, GatewayRequest, TaskType, Transport, UpstreamError};

pub const RATE_LIMITED_MESSAGE: &str = "Too many requests. Please try again later.";
pub const INVALID_TYPE_MESSAGE: &str = "Invalid request type";
pub const INVALID_BODY_MESSAGE: &str = "Invalid request body";
pub const MISSING_PROMPT_MESSAGE: &str = "Prompt is required";
pub const UPSTREAM_FAILURE_MESSAGE: &str = "Failed to process request";
pub const MODELS_UNAVAILABLE_MESSAGE: &str = "Failed to fetch models";

// ============================================================================
// Errors
// ============================================================================

/// Failures surfaced to callers. Upstream detail stays in the source chain
/// and logs; the response carries only [`GatewayError::public_message`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] UpstreamError),

    #[error("model catalog unavailable: {0}")]
    ModelsUnavailable(#[source] UpstreamError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(_) | GatewayError::ModelsUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::RateLimited => RATE_LIMITED_MESSAGE,
            GatewayError::InvalidRequest(message) => *message,
            GatewayError::Upstream(_) => UPSTREAM_FAILURE_MESSAGE,
            GatewayError::ModelsUnavailable(_) => MODELS_UNAVAILABLE_MESSAGE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        response::error(self.status(), self.public_message())
    }
}

// ============================================================================
// Request parsing
// ============================================================================

/// Inbound body as sent by callers.
#[derive(Deserialize)]
struct RawRequest {
    #[serde(rename = "type")]
    task_type: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    options: Option<Map<String, Value>>,
}

/// Parse and validate an inbound body.
pub fn parse_request(body: &[u8]) -> Result<GatewayRequest, GatewayError> {
    let raw: RawRequest = serde_json::from_slice(body)
        .map_err(|_| GatewayError::InvalidRequest(INVALID_BODY_MESSAGE))?;

    let task = raw
        .task_type
        .as_deref()
        .and_then(TaskType::parse)
        .ok_or(GatewayError::InvalidRequest(INVALID_TYPE_MESSAGE))?;

    let request = GatewayRequest {
        task,
        prompt: raw.prompt,
        options: raw.options.unwrap_or_default(),
    };

    let has_input = match task {
        TaskType::Chat => request.prompt().is_some() || request.messages().is_some(),
        TaskType::Image | TaskType::Audio => request.prompt().is_some(),
    };
    if !has_input {
        return Err(GatewayError::InvalidRequest(MISSING_PROMPT_MESSAGE));
    }

    Ok(request)
}

// ============================================================================
// Gateway
// ============================================================================

/// The gateway: rate limiter, primary transport and fallback transport.
pub struct Gateway {
    limiter: Arc<RateLimiter>,
    policy: RateLimitPolicy,
    primary: Arc<dyn Transport>,
    fallback: Arc<dyn Transport>,
}

impl Gateway {
    pub fn new(
        limiter: Arc<RateLimiter>,
        policy: RateLimitPolicy,
        primary: Arc<dyn Transport>,
        fallback: Arc<dyn Transport>,
    ) -> Self {
        Self {
            limiter,
            policy,
            primary,
            fallback,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run one inbound body through the full pipeline.
    pub async fn handle(
        &self,
        client_key: &str,
        body: &[u8],
    ) -> Result<GatewayResponse, GatewayError> {
        self.admit(client_key)?;
        self.respond(body).await
    }

    /// Rate check for `client_key`. Consumes one slot when admitted.
    pub fn admit(&self, client_key: &str) -> Result<(), GatewayError> {
        if self.limiter.check(client_key, self.policy) {
            Ok(())
        } else {
            warn!(client = client_key, "Rate limit exceeded");
            Err(GatewayError::RateLimited)
        }
    }

    /// Parse an admitted body and dispatch it.
    pub async fn respond(&self, body: &[u8]) -> Result<GatewayResponse, GatewayError> {
        let request = parse_request(body)?;
        Span::current().record("task", request.task.as_str());
        self.dispatch(&request).await
    }

    /// Call upstream (with at most one fallback hop) and normalize the result.
    pub async fn dispatch(
        &self,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let outcome = match self.primary.invoke(request).await {
            Err(err) if err.class() == ErrorClass::NotFound && request.task.supports_fallback() => {
                info!(task = %request.task, error = %err, "Primary endpoint not found, using fallback");
                self.fallback.invoke(request).await
            }
            outcome => outcome,
        };

        match outcome {
            Ok(payload) => Ok(normalize(request.task, payload)),
            Err(err) => {
                error!(
                    task = %request.task,
                    class = ?err.class(),
                    error = %err,
                    "Upstream request failed"
                );
                Err(GatewayError::Upstream(err))
            }
        }
    }
}
