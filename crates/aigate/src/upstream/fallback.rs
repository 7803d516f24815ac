//! Plain GET fallback for chat tasks.
//!
//! When the structured chat endpoint answers 404, the request is collapsed
//! into one text query and sent to `{text_base_url}/{query}`. The outcome is
//! returned as-is; this transport never falls back further.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::auth::UpstreamAuth;
use super::client::{build_url, read_payload};
use super::error::{UpstreamError, ensure_success};
use super::types::GatewayRequest;
use super::{Transport, UpstreamOutcome};
use crate::config::UpstreamConfig;

pub struct FallbackCoordinator {
    http: Client,
    settings: UpstreamConfig,
    auth: UpstreamAuth,
}

impl FallbackCoordinator {
    #[must_use]
    pub fn new(http: Client, settings: UpstreamConfig, auth: UpstreamAuth) -> Self {
        Self {
            http,
            settings,
            auth,
        }
    }
}

#[async_trait]
impl Transport for FallbackCoordinator {
    async fn invoke(&self, request: &GatewayRequest) -> UpstreamOutcome {
        let query = request.plain_query().ok_or(UpstreamError::MissingPrompt)?;
        let mut url = build_url(&self.settings.text_base_url, &[query.as_str()])?;
        {
            let model = request
                .option_str("model")
                .unwrap_or(&self.settings.text_model);

            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("model", model);
            if let Some(system) = request.option_str("system") {
                pairs.append_pair("system", system);
            }
            for key in ["seed", "temperature"] {
                if let Some(value) = request.options.get(key).and_then(scalar_param) {
                    pairs.append_pair(key, &value);
                }
            }
        }
        self.auth.apply_query(&mut url);

        debug!(task = %request.task, query_len = query.len(), "Issuing fallback request");
        let response = self.auth.apply_header(self.http.get(url)).send().await?;
        let response = ensure_success(response).await?;
        read_payload(response).await
    }
}

fn scalar_param(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{ErrorClass, TaskType, UpstreamPayload};
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn coordinator_for(server_url: &str, key: Option<&str>) -> FallbackCoordinator {
        let settings = UpstreamConfig {
            text_base_url: server_url.to_string(),
            timeout_seconds: 5,
            ..UpstreamConfig::default()
        };
        FallbackCoordinator::new(
            Client::new(),
            settings,
            UpstreamAuth::new(key.map(str::to_string)),
        )
    }

    #[tokio::test]
    async fn collapses_prompt_into_get_query() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex("^/hello%20there".to_string()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("model".into(), "mistral".into()),
                Matcher::UrlEncoded("system".into(), "be kind".into()),
                Matcher::UrlEncoded("seed".into(), "42".into()),
                Matcher::UrlEncoded("token".into(), "secret".into()),
            ]))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body("hi there")
            .create_async()
            .await;

        let request = GatewayRequest::new(TaskType::Chat, "hello there")
            .with_option("model", json!("mistral"))
            .with_option("system", json!("be kind"))
            .with_option("seed", json!(42));
        let payload = coordinator_for(&server.url(), Some("secret"))
            .invoke(&request)
            .await
            .unwrap();

        assert_eq!(payload, UpstreamPayload::Text("hi there".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn json_fallback_body_is_kept_as_json() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("^/ping".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content":"pong"}"#)
            .create_async()
            .await;

        let payload = coordinator_for(&server.url(), None)
            .invoke(&GatewayRequest::new(TaskType::Chat, "ping"))
            .await
            .unwrap();

        assert_eq!(payload, UpstreamPayload::Json(json!({"content": "pong"})));
    }

    #[tokio::test]
    async fn fallback_failure_is_returned_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let err = coordinator_for(&server.url(), None)
            .invoke(&GatewayRequest::new(TaskType::Chat, "hello"))
            .await
            .unwrap_err();

        assert_eq!(err.class(), ErrorClass::NotFound);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn dot_query_is_rejected_without_a_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body("base page")
            .expect(0)
            .create_async()
            .await;

        let err = coordinator_for(&server.url(), None)
            .invoke(&GatewayRequest::new(TaskType::Chat, ".."))
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::InvalidUrl(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn no_query_means_missing_prompt() {
        let mut request = GatewayRequest::new(TaskType::Chat, "");
        request.prompt = None;

        let err = coordinator_for("http://127.0.0.1:9", None)
            .invoke(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::MissingPrompt));
    }
}
