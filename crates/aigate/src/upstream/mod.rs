//! Upstream AI provider access.
//!
//! [`UpstreamClient`] speaks the provider's structured endpoints for every task
//! family. [`FallbackCoordinator`] speaks the plain GET endpoint that is used
//! when a structured chat endpoint has gone missing. Both implement
//! [`Transport`], so the gateway treats them uniformly.

mod auth;
mod client;
mod error;
mod fallback;
mod types;

use async_trait::async_trait;

pub use auth::{API_KEY_ENV, UpstreamAuth};
pub use client::UpstreamClient;
pub use error::{ErrorClass, UpstreamError};
pub use fallback::FallbackCoordinator;
pub use types::{
    AudioOutput, ChatMessage, ChatRequest, GatewayRequest, Message, ModelCatalog, Role, TaskType,
    UpstreamPayload,
};

/// Result of a single upstream call.
pub type UpstreamOutcome = Result<UpstreamPayload, UpstreamError>;

/// A way of carrying a [`GatewayRequest`] to the provider.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue the request and return the raw outcome.
    async fn invoke(&self, request: &GatewayRequest) -> UpstreamOutcome;
}
