//! Provider credential handling.

use std::fmt;

use reqwest::RequestBuilder;
use url::Url;

/// Environment variable holding the optional provider credential.
pub const API_KEY_ENV: &str = "UPSTREAM_API_KEY";

/// Query parameter name the provider reads the credential from.
const TOKEN_PARAM: &str = "token";

/// Optional provider credential.
///
/// The provider wants the key in two places: an `Authorization` bearer header
/// and a `token` query parameter. Without a key, requests go out
/// unauthenticated.
#[derive(Clone, Default)]
pub struct UpstreamAuth {
    api_key: Option<String>,
}

impl UpstreamAuth {
    /// Blank keys count as absent.
    pub fn new(api_key: Option<String>) -> Self {
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        Self { api_key }
    }

    /// Read the credential from [`API_KEY_ENV`].
    pub fn from_env() -> Self {
        Self::new(std::env::var(API_KEY_ENV).ok())
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Append the `token` query parameter.
    pub fn apply_query(&self, url: &mut Url) {
        if let Some(ref key) = self.api_key {
            url.query_pairs_mut().append_pair(TOKEN_PARAM, key);
        }
    }

    /// Attach the bearer header.
    pub fn apply_header(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }
}

impl fmt::Debug for UpstreamAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamAuth")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
