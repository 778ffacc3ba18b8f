//! Downstream orchestrator webhook.

use std::time::Duration;

use async_trait::async_trait;
use percept_core::{IntentionResult, SessionId};
use percept_settings::OrchestratorSettings;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::errors::{ClientResult, api_error};
use crate::traits::ActionNotifier;

/// Payload posted to the orchestrator for an actionable intention.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Session the utterance came from.
    pub session_id: SessionId,
    /// Intention category.
    pub intention_type: String,
    /// What the user wants.
    pub description: String,
    /// Analyzer confidence.
    pub confidence: f64,
    /// The utterance that was analysed.
    pub transcript: String,
    /// Context snippets the analysis used.
    pub environment_context: Vec<String>,
    /// Unix seconds when the result was produced.
    pub timestamp: i64,
}

impl ActionRequest {
    /// Build the request for `result` produced in `session_id`.
    pub fn from_result(session_id: &SessionId, result: &IntentionResult) -> Self {
        Self {
            session_id: session_id.clone(),
            intention_type: result.intention_type.clone(),
            description: result.description.clone(),
            confidence: result.confidence,
            transcript: result.transcript.clone(),
            environment_context: result.environment_context.clone(),
            timestamp: result.timestamp.timestamp(),
        }
    }
}

/// Posts [`ActionRequest`]s with bearer authentication.
pub struct WebhookNotifier {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl WebhookNotifier {
    /// Create a notifier for `endpoint`.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, settings: &OrchestratorSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ActionNotifier for WebhookNotifier {
    #[instrument(skip_all, fields(session_id = %request.session_id, intention_type = %request.intention_type))]
    async fn notify(&self, request: &ActionRequest) -> ClientResult<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &text));
        }
        info!("orchestrator accepted action");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use percept_core::IntentionAnalysis;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::errors::ClientError;

    fn request() -> ActionRequest {
        let analysis = IntentionAnalysis {
            has_clear_intention: true,
            intention_type: "navigation".into(),
            description: "go to the kitchen".into(),
            confidence: 0.9,
            reasoning: String::new(),
        };
        let result = IntentionResult::from_analysis(analysis, "go to the kitchen ", vec!["Overview: hall".into()]);
        ActionRequest::from_result(&SessionId::from("s1"), &result)
    }

    #[test]
    fn request_copies_result_fields() {
        let r = request();
        assert_eq!(r.session_id.as_str(), "s1");
        assert_eq!(r.transcript, "go to the kitchen ");
        assert_eq!(r.environment_context, vec!["Overview: hall".to_string()]);
    }

    #[tokio::test]
    async fn ok_status_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/actions"))
            .and(header("authorization", "Bearer orch-key"))
            .and(body_partial_json(serde_json::json!({"session_id": "s1", "intention_type": "navigation"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(
            format!("{}/actions", server.uri()),
            "orch-key",
            &OrchestratorSettings::default(),
        );
        notifier.notify(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn other_success_codes_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), "k", &OrchestratorSettings::default());
        let err = notifier.notify(&request()).await.unwrap_err();
        assert_matches!(err, ClientError::Api { status: 202, .. });
    }
}
