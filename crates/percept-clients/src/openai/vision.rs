use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use percept_core::{ImageFrame, SceneDescription};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use super::{OpenAiClient, extract_json_object};
use crate::errors::ClientResult;
use crate::traits::VisionClient;

const SCENE_PROMPT: &str = "Analyze this image and describe the environment for a robot assistant. \
Focus on key objects and where they are, the room type and layout, people present and what they are doing, \
and any items relevant to robot tasks.

Respond with a JSON object only, in this format:
{
  \"overview\": string,
  \"key_elements\": [string],
  \"layout\": string,
  \"activities\": [string],
  \"additional_info\": {string: string}
}";

#[derive(Deserialize, Default)]
#[serde(default)]
struct SceneReply {
    overview: String,
    key_elements: Vec<String>,
    layout: String,
    activities: Vec<String>,
    additional_info: BTreeMap<String, Value>,
}

impl From<SceneReply> for SceneDescription {
    fn from(reply: SceneReply) -> Self {
        let additional_info = reply
            .additional_info
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect();
        Self {
            overview: reply.overview,
            key_elements: reply.key_elements,
            layout: reply.layout,
            activities: reply.activities,
            additional_info,
        }
    }
}

/// Parse a vision reply, keeping free text as the overview when it is not JSON.
pub(crate) fn parse_scene(content: &str) -> SceneDescription {
    match serde_json::from_str::<SceneReply>(extract_json_object(content)) {
        Ok(reply) => reply.into(),
        Err(error) => {
            warn!(%error, "vision reply was not JSON, keeping raw text");
            SceneDescription::unparsed(content)
        }
    }
}

#[async_trait]
impl VisionClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.vision.model))]
    async fn describe(&self, frame: &ImageFrame) -> ClientResult<SceneDescription> {
        let body = json!({
            "model": self.vision.model,
            "max_tokens": self.vision.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": SCENE_PROMPT},
                    {"type": "image_url", "image_url": {"url": frame.data_url()}},
                ],
            }],
        });
        let content = self
            .chat(body, Duration::from_millis(self.vision.timeout_ms))
            .await?;
        Ok(parse_scene(&content))
    }
}
