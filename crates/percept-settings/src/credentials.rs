//! API keys read from the environment.

use crate::errors::{Result, SettingsError};
use crate::types::PerceptSettings;

/// Keys for the external services a session talks to.
#[derive(Clone)]
pub struct Credentials {
    /// Vision, intention and embeddings.
    pub openai_api_key: String,
    /// Streaming speech-to-text.
    pub deepgram_api_key: String,
    /// Similarity store; `None` disables it.
    pub pinecone_api_key: Option<String>,
    /// Orchestrator webhook bearer token; `None` disables notifications.
    pub orchestrator_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"<redacted>")
            .field("deepgram_api_key", &"<redacted>")
            .field("pinecone_api_key", &self.pinecone_api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "orchestrator_api_key",
                &self.orchestrator_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY")
                .ok_or(SettingsError::MissingCredential("OPENAI_API_KEY"))?,
            deepgram_api_key: get("DEEPGRAM_API_KEY")
                .ok_or(SettingsError::MissingCredential("DEEPGRAM_API_KEY"))?,
            pinecone_api_key: get("PINECONE_API_KEY"),
            orchestrator_api_key: get("ORCHESTRATOR_API_KEY"),
        })
    }

    /// Fail when an optional service has only one of endpoint and key.
    pub fn check_services(&self, settings: &PerceptSettings) -> Result<()> {
        match (
            settings.vector_store.index_host.is_some(),
            self.pinecone_api_key.is_some(),
        ) {
            (true, false) => {
                return Err(SettingsError::PartialService {
                    service: "vector store",
                    missing: "PINECONE_API_KEY",
                });
            }
            (false, true) => {
                return Err(SettingsError::PartialService {
                    service: "vector store",
                    missing: "PINECONE_INDEX_HOST",
                });
            }
            _ => {}
        }
        match (
            settings.orchestrator.endpoint.is_some(),
            self.orchestrator_api_key.is_some(),
        ) {
            (true, false) => Err(SettingsError::PartialService {
                service: "orchestrator",
                missing: "ORCHESTRATOR_API_KEY",
            }),
            (false, true) => Err(SettingsError::PartialService {
                service: "orchestrator",
                missing: "ORCHESTRATOR_ENDPOINT",
            }),
            _ => Ok(()),
        }
    }
}
