//! aigate - An AI request gateway.
//!
//! Receives typed generation tasks (chat, image, audio), rate limits callers,
//! forwards work to an upstream AI provider with a single bounded fallback hop,
//! and answers every request with one uniform JSON envelope.

pub mod config;
pub mod gateway;
pub mod handlers;
pub mod logging;
pub mod normalize;
pub mod ratelimit;
pub mod response;
pub mod server;
pub mod upstream;

#[cfg(test)]
mod test_support;

pub use gateway::{Gateway, GatewayError};
pub use ratelimit::{RateLimitPolicy, RateLimiter};
pub use response::GatewayResponse;
