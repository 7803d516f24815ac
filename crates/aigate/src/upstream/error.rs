//! Upstream error types and failure classification.

use std::time::Duration;

use thiserror::Error;

/// Coarse classification of an upstream failure, used to decide on fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The endpoint does not exist (404). Chat tasks may fall back.
    NotFound,
    /// Timeouts, throttling and server-side errors.
    Transient,
    /// Everything else.
    Fatal,
}

/// Errors that can occur when calling the upstream provider.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// HTTP request failed before a status was received, or the body could not be read.
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Provider answered with a non-2xx status.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// A request URL could not be built from the configured base URL.
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    /// The request carries nothing that could be sent as a prompt.
    #[error("request has no usable prompt")]
    MissingPrompt,

    /// The provider answered 2xx with a body of the wrong kind.
    #[error("unexpected {media_type} body for {task} task")]
    UnexpectedContent { task: &'static str, media_type: String },

    /// No answer within the allotted time.
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl UpstreamError {
    /// Classify this failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            UpstreamError::Request(e) if e.is_timeout() => ErrorClass::Transient,
            UpstreamError::Timeout(_) => ErrorClass::Transient,
            UpstreamError::Request(e) => match e.status() {
                Some(status) => classify_status(status.as_u16()),
                None => ErrorClass::Fatal,
            },
            UpstreamError::Api { status, .. } => classify_status(*status),
            UpstreamError::InvalidUrl(_)
            | UpstreamError::MissingPrompt
            | UpstreamError::UnexpectedContent { .. } => ErrorClass::Fatal,
        }
    }
}

/// Map an HTTP status code to an [`ErrorClass`].
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        404 => ErrorClass::NotFound,
        408 | 429 | 500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// Turn a non-2xx response into [`UpstreamError::Api`], keeping the body for logs.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, UpstreamError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(UpstreamError::Api { status, message })
}
