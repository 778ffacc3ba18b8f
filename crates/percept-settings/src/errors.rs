//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading settings or credentials.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A settings value was invalid.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
    /// A required environment variable is not set.
    #[error("missing required environment variable {0}")]
    MissingCredential(&'static str),
    /// Only one half of an optional service configuration is present.
    #[error("{service} is partially configured: {missing} is not set")]
    PartialService {
        /// Human-readable service name.
        service: &'static str,
        /// The missing setting or variable.
        missing: &'static str,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_display() {
        let err = SettingsError::MissingCredential("OPENAI_API_KEY");
        assert_eq!(
            err.to_string(),
            "missing required environment variable OPENAI_API_KEY"
        );
    }

    #[test]
    fn partial_service_display() {
        let err = SettingsError::PartialService {
            service: "orchestrator",
            missing: "ORCHESTRATOR_API_KEY",
        };
        assert!(err.to_string().contains("ORCHESTRATOR_API_KEY"));
    }

    #[test]
    fn json_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: SettingsError = json_err.into();
        assert!(matches!(err, SettingsError::Json(_)));
    }
}
