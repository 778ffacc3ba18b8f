//! Optional downstream services and the local camera.

use serde::{Deserialize, Serialize};

/// Similarity store settings. The store is disabled without an index host.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VectorStoreSettings {
    /// Index data-plane host, e.g. `https://robots-abc123.svc.pinecone.io`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_host: Option<String>,
    /// Namespace prefix; each session writes to `<prefix>-<session id>`.
    pub namespace_prefix: String,
    /// Embeddings base URL.
    pub embedding_base_url: String,
    /// Embedding model.
    pub embedding_model: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            index_host: None,
            namespace_prefix: "perceptus".to_string(),
            embedding_base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// Orchestrator webhook settings. Notifications are skipped without an endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Webhook URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 10_000,
        }
    }
}

/// Local camera capture via ffmpeg.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraSettings {
    /// ffmpeg executable.
    pub ffmpeg_path: String,
    /// Device name; the platform default is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Capture width in pixels.
    pub width: u32,
    /// Capture height in pixels.
    pub height: u32,
    /// Per-capture timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            device: None,
            width: 640,
            height: 480,
            timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_services_disabled_by_default() {
        assert!(VectorStoreSettings::default().index_host.is_none());
        assert!(OrchestratorSettings::default().endpoint.is_none());
    }

    #[test]
    fn camera_defaults() {
        let c = CameraSettings::default();
        assert_eq!((c.width, c.height), (640, 480));
        assert_eq!(c.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn vector_store_partial_json() {
        let v: VectorStoreSettings =
            serde_json::from_str(r#"{"indexHost": "https://idx.example"}"#).unwrap();
        assert_eq!(v.index_host.as_deref(), Some("https://idx.example"));
        assert_eq!(v.namespace_prefix, "perceptus");
    }
}
