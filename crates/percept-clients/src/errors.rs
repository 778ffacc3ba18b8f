//! Collaborator error types.

/// Result type alias for collaborator calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors from external collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Streaming socket failed.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The service answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
    },

    /// The service answered successfully but without the expected payload.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Local frame capture failed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// The call did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The call was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl ClientError {
    /// Short category used as a metrics label.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Timeout(_) => "timeout",
            Self::Http(_) | Self::WebSocket(_) => "network",
            Self::Json(_) | Self::UnexpectedResponse(_) => "parse",
            Self::Api { .. } => "api",
            Self::Capture(_) => "capture",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Build an [`ClientError::Api`] from a failed response body.
///
/// Understands the `{"error": {"message": ...}}` shape and falls back to the raw body.
pub(crate) fn api_error(status: u16, body: &str) -> ClientError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            let error = &json["error"];
            error["message"]
                .as_str()
                .or_else(|| error.as_str())
                .or_else(|| json["message"].as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body.chars().take(500).collect()
            }
        });
    ClientError::Api { status, message }
}
