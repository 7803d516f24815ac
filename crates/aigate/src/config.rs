use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::ratelimit::RateLimitPolicy;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Largest accepted request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    120
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

// ============================================================================
// UpstreamConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the text service (structured chat, audio and plain GET fallback).
    #[serde(default = "default_text_base_url")]
    pub text_base_url: String,
    /// Base URL of the image service.
    #[serde(default = "default_image_base_url")]
    pub image_base_url: String,
    /// Bound on every upstream call. Elapsed calls count as transient failures.
    #[serde(default = "default_upstream_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_audio_model")]
    pub audio_model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_image_size")]
    pub image_width: u32,
    #[serde(default = "default_image_size")]
    pub image_height: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            text_base_url: default_text_base_url(),
            image_base_url: default_image_base_url(),
            timeout_seconds: default_upstream_timeout(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            audio_model: default_audio_model(),
            voice: default_voice(),
            image_width: default_image_size(),
            image_height: default_image_size(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_text_base_url() -> String {
    "https://text.pollinations.ai".to_string()
}

fn default_image_base_url() -> String {
    "https://image.pollinations.ai".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_text_model() -> String {
    "openai".to_string()
}

fn default_image_model() -> String {
    "flux".to_string()
}

fn default_audio_model() -> String {
    "openai-audio".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_image_size() -> u32 {
    1024
}

// ============================================================================
// RateLimitConfig
// ============================================================================

/// One policy for every task type, checked before the body is parsed.
#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// How often stale windows are evicted.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.max_requests, Duration::from_millis(self.window_ms))
    }
}

fn default_max_requests() -> u32 {
    1
}

fn default_window_ms() -> u64 {
    1000
}

fn default_sweep_interval() -> u64 {
    60
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================
