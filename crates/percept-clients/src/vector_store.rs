//! Pinecone similarity store backed by `OpenAI` embeddings.

use std::time::Duration;

use async_trait::async_trait;
use percept_settings::VectorStoreSettings;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::errors::{ClientResult, api_error};
use crate::openai::OpenAiClient;
use crate::traits::VectorStore;

/// Pinecone data-plane client.
pub struct PineconeStore {
    http: reqwest::Client,
    index_host: String,
    api_key: String,
    embeddings: OpenAiClient,
    embedding_model: String,
    timeout: Duration,
}

impl PineconeStore {
    /// Create a store for one index.
    ///
    /// `embeddings` is re-pointed at the configured embeddings base URL.
    pub fn new(
        index_host: &str,
        api_key: impl Into<String>,
        settings: &VectorStoreSettings,
        embeddings: OpenAiClient,
    ) -> Self {
        let host = index_host.trim_end_matches('/');
        let index_host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_owned()
        } else {
            format!("https://{host}")
        };
        Self {
            http: reqwest::Client::new(),
            index_host,
            api_key: api_key.into(),
            embeddings: embeddings.with_base_url(&settings.embedding_base_url),
            embedding_model: settings.embedding_model.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }

    async fn post(&self, route: &str, body: &Value) -> ClientResult<Value> {
        let response = self
            .http
            .post(format!("{}{route}", self.index_host))
            .header("Api-Key", &self.api_key)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &text));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    #[instrument(skip(self, text, metadata))]
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        text: &str,
        metadata: Value,
    ) -> ClientResult<()> {
        let values = self
            .embeddings
            .embed(&self.embedding_model, text, self.timeout)
            .await?;
        let body = json!({
            "namespace": namespace,
            "vectors": [{"id": id, "values": values, "metadata": metadata}],
        });
        let reply = self.post("/vectors/upsert", &body).await?;
        debug!(upserted = reply["upsertedCount"].as_u64(), "context stored");
        Ok(())
    }

    #[instrument(skip(self, text))]
    async fn query(&self, namespace: &str, text: &str, top_k: usize) -> ClientResult<Vec<String>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = self
            .embeddings
            .embed(&self.embedding_model, text, self.timeout)
            .await?;
        let body = json!({
            "namespace": namespace,
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        let reply = self.post("/query", &body).await?;
        let snippets = reply["matches"]
            .as_array()
            .map(|matches| {
                matches
                    .iter()
                    .filter_map(|m| m["metadata"]["text"].as_str())
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(snippets)
    }
}
