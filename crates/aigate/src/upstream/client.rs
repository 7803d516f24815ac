//! Structured upstream client for chat, image and audio tasks.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::auth::UpstreamAuth;
use super::error::{UpstreamError, ensure_success};
use super::fallback::FallbackCoordinator;
use super::types::{
    AudioOutput, ChatRequest, GatewayRequest, ModelCatalog, TaskType, UpstreamPayload, model_names,
};
use super::{Transport, UpstreamOutcome};
use crate::config::UpstreamConfig;

/// Sampling options callers may forward to the structured chat endpoint.
const SAMPLING_OPTIONS: &[&str] = &[
    "temperature",
    "max_tokens",
    "top_p",
    "seed",
    "presence_penalty",
    "frequency_penalty",
];

/// Media type assumed for image bodies that arrive without one.
const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/jpeg";

/// Client for the provider's primary (structured) endpoints.
pub struct UpstreamClient {
    http: Client,
    settings: UpstreamConfig,
    auth: UpstreamAuth,
}

impl UpstreamClient {
    /// Build a client whose every call is bounded by `settings.timeout_seconds`.
    pub fn new(settings: UpstreamConfig, auth: UpstreamAuth) -> Result<Self, UpstreamError> {
        let http = Client::builder().timeout(settings.timeout()).build()?;
        Ok(Self::with_client(http, settings, auth))
    }

    #[must_use]
    pub fn with_client(http: Client, settings: UpstreamConfig, auth: UpstreamAuth) -> Self {
        Self {
            http,
            settings,
            auth,
        }
    }

    /// A fallback coordinator sharing this client's connection pool and credential.
    pub fn fallback(&self) -> FallbackCoordinator {
        FallbackCoordinator::new(self.http.clone(), self.settings.clone(), self.auth.clone())
    }

    /// List text and image models. Both listings are fetched concurrently.
    pub async fn list_models(&self) -> Result<ModelCatalog, UpstreamError> {
        let (image, text) = tokio::join!(
            self.fetch_listing(&self.settings.image_base_url),
            self.fetch_listing(&self.settings.text_base_url),
        );

        Ok(ModelCatalog {
            image: model_names(&image?),
            text: model_names(&text?),
        })
    }

    async fn fetch_listing(&self, base_url: &str) -> Result<Value, UpstreamError> {
        let mut url = build_url(base_url, &["models"])?;
        self.auth.apply_query(&mut url);

        let response = self.auth.apply_header(self.http.get(url)).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    async fn chat(&self, request: &GatewayRequest) -> UpstreamOutcome {
        let body = ChatRequest {
            model: request
                .option_str("model")
                .unwrap_or(&self.settings.text_model)
                .to_string(),
            messages: request.chat_messages(),
            modalities: None,
            audio: None,
            sampling: sampling_options(&request.options),
        };
        self.post_structured(&body).await
    }

    async fn audio(&self, request: &GatewayRequest) -> UpstreamOutcome {
        let voice = request
            .option_str("voice")
            .unwrap_or(&self.settings.voice)
            .to_string();

        let body = ChatRequest {
            model: request
                .option_str("model")
                .unwrap_or(&self.settings.audio_model)
                .to_string(),
            messages: request.chat_messages(),
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            audio: Some(AudioOutput {
                voice,
                format: "mp3".to_string(),
            }),
            sampling: sampling_options(&request.options),
        };
        self.post_structured(&body).await
    }

    async fn image(&self, request: &GatewayRequest) -> UpstreamOutcome {
        let prompt = request.prompt().ok_or(UpstreamError::MissingPrompt)?;
        let mut url = build_url(&self.settings.image_base_url, &["prompt", prompt])?;
        {
            let width = option_u64(request, "width").unwrap_or(self.settings.image_width.into());
            let height = option_u64(request, "height").unwrap_or(self.settings.image_height.into());
            let model = request
                .option_str("model")
                .unwrap_or(&self.settings.image_model);

            let mut query = url.query_pairs_mut();
            query
                .append_pair("width", &width.to_string())
                .append_pair("height", &height.to_string())
                .append_pair("model", model)
                .append_pair("nologo", "true");
            if let Some(seed) = option_u64(request, "seed") {
                query.append_pair("seed", &seed.to_string());
            }
        }
        self.auth.apply_query(&mut url);

        debug!(url = %redact(&url), "Requesting image");
        let response = self.auth.apply_header(self.http.get(url)).send().await?;
        let response = ensure_success(response).await?;

        let media_type = media_type(&response);
        let bytes = response.bytes().await?;
        image_payload(media_type, bytes)
    }

    async fn post_structured(&self, body: &ChatRequest) -> UpstreamOutcome {
        let mut url = build_url(&self.settings.text_base_url, &["openai"])?;
        self.auth.apply_query(&mut url);

        debug!(model = %body.model, messages = body.messages.len(), "Posting structured request");
        let response = self
            .auth
            .apply_header(self.http.post(url))
            .json(body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        read_payload(response).await
    }
}

#[async_trait]
impl Transport for UpstreamClient {
    async fn invoke(&self, request: &GatewayRequest) -> UpstreamOutcome {
        match request.task {
            TaskType::Chat => self.chat(request).await,
            TaskType::Image => self.image(request).await,
            TaskType::Audio => self.audio(request).await,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Append path segments to a base URL, percent-encoding each segment.
///
/// URL parsing collapses `.` and `..` (encoded or not), so such segments
/// cannot be addressed and are rejected.
pub(crate) fn build_url(base: &str, segments: &[&str]) -> Result<Url, UpstreamError> {
    if let Some(segment) = segments.iter().find(|s| is_dot_segment(s)) {
        return Err(UpstreamError::InvalidUrl(format!(
            "unaddressable path segment {:?}",
            segment
        )));
    }
    let mut url =
        Url::parse(base).map_err(|e| UpstreamError::InvalidUrl(format!("{}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|()| UpstreamError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn is_dot_segment(segment: &str) -> bool {
    matches!(segment, "." | "..")
}

/// Image bodies must be binary. Unlabelled or generic bytes count as JPEG.
fn image_payload(media_type: Option<String>, bytes: Bytes) -> UpstreamOutcome {
    let media_type = match media_type.as_deref() {
        None | Some("application/octet-stream") => DEFAULT_IMAGE_MEDIA_TYPE,
        Some(t) => t,
    };
    match UpstreamPayload::from_body(Some(media_type), bytes) {
        binary @ UpstreamPayload::Binary { .. } => Ok(binary),
        _ => Err(UpstreamError::UnexpectedContent {
            task: TaskType::Image.as_str(),
            media_type: media_type.to_string(),
        }),
    }
}

/// Decode a successful response body into an [`UpstreamPayload`].
pub(crate) async fn read_payload(response: reqwest::Response) -> UpstreamOutcome {
    let media_type = media_type(&response);
    let bytes = response.bytes().await?;
    Ok(UpstreamPayload::from_body(media_type.as_deref(), bytes))
}

/// Lowercased media type without parameters.
fn media_type(response: &reqwest::Response) -> Option<String> {
    let value = response.headers().get(CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next().unwrap_or(value).trim();
    (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
}

fn sampling_options(options: &Map<String, Value>) -> Map<String, Value> {
    SAMPLING_OPTIONS
        .iter()
        .filter_map(|key| Some(((*key).to_string(), options.get(*key)?.clone())))
        .collect()
}

/// Numeric option, accepting numbers or numeric strings.
fn option_u64(request: &GatewayRequest, key: &str) -> Option<u64> {
    match request.options.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// URL with the credential query parameter masked, for logs.
fn redact(url: &Url) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".into() } else { v };
            (k.into_owned(), v.into_owned())
        })
        .collect();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn settings_for(server_url: &str) -> UpstreamConfig {
        UpstreamConfig {
            text_base_url: server_url.to_string(),
            image_base_url: server_url.to_string(),
            timeout_seconds: 5,
            ..UpstreamConfig::default()
        }
    }

    fn client_for(server_url: &str, key: Option<&str>) -> UpstreamClient {
        UpstreamClient::new(
            settings_for(server_url),
            UpstreamAuth::new(key.map(str::to_string)),
        )
        .unwrap()
    }

    #[test]
    fn build_url_encodes_segments() {
        let url = build_url("https://example.com", &["prompt", "a cat/dog?"]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/prompt/a%20cat%2Fdog%3F");

        let nested = build_url("https://example.com/api/", &["openai"]).unwrap();
        assert_eq!(nested.as_str(), "https://example.com/api/openai");
    }

    #[test]
    fn build_url_rejects_dot_segments() {
        for segment in [".", ".."] {
            let err = build_url("https://text.example.com/v1", &[segment]).unwrap_err();
            assert!(matches!(err, UpstreamError::InvalidUrl(_)), "{segment:?}");
            assert_eq!(err.class(), crate::upstream::ErrorClass::Fatal);
        }

        let dotted = build_url("https://example.com", &["...", "a.b"]).unwrap();
        assert_eq!(dotted.as_str(), "https://example.com/.../a.b");
    }

    #[test]
    fn build_url_rejects_garbage() {
        let err = build_url("not a url", &["x"]).unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidUrl(_)));
    }

    #[test]
    fn sampling_options_keep_whitelist_only() {
        let options = json!({"temperature": 0.2, "seed": 7, "voice": "nova", "messages": []});
        let Value::Object(options) = options else {
            unreachable!()
        };
        let sampling = sampling_options(&options);
        assert_eq!(sampling.len(), 2);
        assert_eq!(sampling["temperature"], json!(0.2));
        assert_eq!(sampling["seed"], json!(7));
    }

    #[test]
    fn redact_masks_token() {
        let url = Url::parse("https://example.com/p?model=flux&token=secret").unwrap();
        let redacted = redact(&url);
        assert!(!redacted.contains("secret"));
        assert!(redacted.contains("model=flux"));
    }

    #[tokio::test]
    async fn chat_posts_structured_request_with_credentials() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex("^/openai".to_string()))
            .match_query(Matcher::UrlEncoded("token".into(), "secret".into()))
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::PartialJson(json!({
                "model": "openai",
                "messages": [{"role": "user", "content": "hello"}],
                "temperature": 0.3
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"choices": [{"message": {"content": "hi"}}]}).to_string())
            .create_async()
            .await;

        let client = client_for(&server.url(), Some("secret"));
        let request =
            GatewayRequest::new(TaskType::Chat, "hello").with_option("temperature", json!(0.3));
        let payload = client.invoke(&request).await.unwrap();

        assert_eq!(
            payload,
            UpstreamPayload::Json(json!({"choices": [{"message": {"content": "hi"}}]}))
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn chat_without_credential_sends_no_auth() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex("^/openai".to_string()))
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("plain")
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        let payload = client
            .invoke(&GatewayRequest::new(TaskType::Chat, "hello"))
            .await
            .unwrap();

        assert_eq!(payload, UpstreamPayload::Text("plain".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn chat_404_is_classified_not_found() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", Matcher::Regex("^/openai".to_string()))
            .with_status(404)
            .with_body("no such endpoint")
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        let err = client
            .invoke(&GatewayRequest::new(TaskType::Chat, "hello"))
            .await
            .unwrap_err();

        assert_eq!(err.class(), crate::upstream::ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", Matcher::Regex("^/openai".to_string()))
            .with_status(503)
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        let err = client
            .invoke(&GatewayRequest::new(TaskType::Chat, "hello"))
            .await
            .unwrap_err();

        assert_eq!(err.class(), crate::upstream::ErrorClass::Transient);
    }

    #[tokio::test]
    async fn image_fetches_bytes_with_generation_params() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex("^/prompt/a%20red%20fox".to_string()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("width".into(), "512".into()),
                Matcher::UrlEncoded("height".into(), "1024".into()),
                Matcher::UrlEncoded("model".into(), "flux".into()),
                Matcher::UrlEncoded("nologo".into(), "true".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(vec![0x89u8, 0x50, 0x4e, 0x47])
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        let request =
            GatewayRequest::new(TaskType::Image, "a red fox").with_option("width", json!(512));
        let payload = client.invoke(&request).await.unwrap();

        match payload {
            UpstreamPayload::Binary { bytes, media_type } => {
                assert_eq!(media_type, "image/png");
                assert_eq!(bytes.to_vec(), vec![0x89u8, 0x50, 0x4e, 0x47]);
            }
            other => panic!("expected binary payload, got {:?}", other),
        }
        mock.assert_async().await;
    }

    #[test]
    fn generic_image_bytes_are_labelled_jpeg() {
        let bytes = Bytes::from_static(&[0xff, 0xd8, 0xff]);
        for media_type in [None, Some("application/octet-stream".to_string())] {
            match image_payload(media_type, bytes.clone()).unwrap() {
                UpstreamPayload::Binary { media_type, .. } => {
                    assert_eq!(media_type, DEFAULT_IMAGE_MEDIA_TYPE)
                }
                other => panic!("expected binary payload, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn image_with_text_body_is_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("^/prompt/".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"prompt blocked"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        let err = client
            .invoke(&GatewayRequest::new(TaskType::Image, "a red fox"))
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::UnexpectedContent { .. }));
        assert_eq!(err.class(), crate::upstream::ErrorClass::Fatal);
    }

    #[tokio::test]
    async fn silent_upstream_times_out_as_transient() {
        let (url, _upstream) = crate::test_support::silent_upstream().await;
        let client = UpstreamClient::new(
            UpstreamConfig {
                timeout_seconds: 1,
                ..settings_for(&url)
            },
            UpstreamAuth::new(None),
        )
        .unwrap();

        let err = client
            .invoke(&GatewayRequest::new(TaskType::Chat, "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::Request(ref e) if e.is_timeout()));
        assert_eq!(err.class(), crate::upstream::ErrorClass::Transient);
    }

    #[tokio::test]
    async fn audio_requests_voice_and_audio_model() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex("^/openai".to_string()))
            .match_body(Matcher::PartialJson(json!({
                "model": "openai-audio",
                "modalities": ["text", "audio"],
                "audio": {"voice": "nova", "format": "mp3"}
            })))
            .with_status(200)
            .with_header("content-type", "audio/mpeg")
            .with_body(vec![1u8, 2, 3])
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        let request =
            GatewayRequest::new(TaskType::Audio, "say hi").with_option("voice", json!("nova"));
        let payload = client.invoke(&request).await.unwrap();

        assert!(matches!(payload, UpstreamPayload::Binary { ref media_type, .. } if media_type == "audio/mpeg"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn list_models_merges_both_listings() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("^/models".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!(["flux", {"name": "openai"}]).to_string())
            .expect(2)
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        let catalog = client.list_models().await.unwrap();

        assert_eq!(catalog.image, vec!["flux", "openai"]);
        assert_eq!(catalog.text, vec!["flux", "openai"]);
    }

    #[tokio::test]
    async fn list_models_fails_when_a_listing_fails() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("^/models".to_string()))
            .with_status(500)
            .expect_at_least(1)
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        assert!(client.list_models().await.is_err());
    }
}
