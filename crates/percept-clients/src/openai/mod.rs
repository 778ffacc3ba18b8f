//! `OpenAI` chat-completions and embeddings client.
//!
//! One client serves three seams: snapshot description ([`VisionClient`]),
//! intention analysis ([`IntentionAnalyzer`]) and the embeddings behind
//! [`PineconeStore`](crate::PineconeStore).
//!
//! [`VisionClient`]: crate::VisionClient
//! [`IntentionAnalyzer`]: crate::IntentionAnalyzer

mod intention;
mod vision;

use std::time::Duration;

use percept_settings::{IntentionSettings, VisionSettings};
use serde_json::{Value, json};
use tracing::debug;

use crate::errors::{ClientError, ClientResult, api_error};

pub use intention::build_intention_prompt;

/// Default embeddings model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// HTTP client for the `OpenAI` REST API.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    vision: VisionSettings,
    intention: IntentionSettings,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("vision_model", &self.vision.model)
            .field("intention_model", &self.intention.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    /// Create a client. The base URL comes from the vision settings.
    pub fn new(
        api_key: impl Into<String>,
        vision: VisionSettings,
        intention: IntentionSettings,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: vision.base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            vision,
            intention,
        }
    }

    /// Point the client at a different API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        base_url.trim_end_matches('/').clone_into(&mut self.base_url);
        self
    }

    /// Send one chat completion and return the first choice's text.
    async fn chat(&self, body: Value, timeout: Duration) -> ClientResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &text));
        }

        let payload: Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ClientError::UnexpectedResponse("no choices in response".into()))?;
        debug!(len = content.len(), "chat completion received");
        Ok(content.to_owned())
    }

    /// Embed `input` with the given model.
    pub async fn embed(&self, model: &str, input: &str, timeout: Duration) -> ClientResult<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&json!({ "model": model, "input": input }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &text));
        }

        let payload: Value = response.json().await?;
        let values = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| ClientError::UnexpectedResponse("no embedding in response".into()))?;
        #[allow(clippy::cast_possible_truncation)]
        let embedding = values
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect::<Vec<_>>();
        if embedding.is_empty() {
            return Err(ClientError::UnexpectedResponse("empty embedding".into()));
        }
        Ok(embedding)
    }
}

/// Isolate the JSON object in a model reply.
///
/// Strips Markdown code fences and any prose around the outermost braces.
pub(crate) fn extract_json_object(content: &str) -> &str {
    let trimmed = content.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn client_for(server: &MockServer) -> OpenAiClient {
        let vision = VisionSettings {
            base_url: server.uri(),
            ..VisionSettings::default()
        };
        OpenAiClient::new("sk-test", vision, IntentionSettings::default())
    }

    #[test]
    fn extracts_fenced_json() {
        let reply = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(reply), "{\"a\": 1}");
        assert_eq!(extract_json_object("Sure! {\"b\": {\"c\": 2}} hope that helps"), "{\"b\": {\"c\": 2}}");
        assert_eq!(extract_json_object("no json here"), "no json here");
    }

    #[tokio::test]
    async fn embed_returns_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.25, -0.5, 1.0]}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let v = client
            .embed(DEFAULT_EMBEDDING_MODEL, "kitchen", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(v, vec![0.25, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn chat_maps_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "rate limited"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .chat(json!({"model": "m", "messages": []}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "API error (429): rate limited");
    }

    #[tokio::test]
    async fn chat_without_choices_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .chat(json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse(_)));
    }
}
