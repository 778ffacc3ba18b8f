use std::time::Duration;

use async_trait::async_trait;
use percept_core::IntentionAnalysis;
use serde_json::json;
use tracing::{instrument, warn};

use super::{OpenAiClient, extract_json_object};
use crate::errors::ClientResult;
use crate::traits::IntentionAnalyzer;

const ANALYSIS_INSTRUCTIONS: &str = r#"Analyze the following transcript to determine if the user has expressed a clear intention for the robot to perform a task.

Transcript: "{transcript}"

Respond with a JSON object only, no other text:
{
  "has_clear_intention": boolean,
  "intention_type": string (e.g. "navigation", "manipulation", "information_gathering"),
  "description": string describing what the user wants,
  "confidence": number between 0 and 1,
  "reasoning": string explaining the analysis
}

Clear intentions look like "Go to the kitchen and bring me a glass of water" or "Pick up that book on the table".
Small talk, questions such as "What time is it?" and statements like "I'm feeling tired" are not clear intentions.

Be conservative: only mark a clear intention if the user explicitly asks the robot to do something specific."#;

/// Build the analyzer prompt for a transcript and its context snippets.
///
/// Context, when present, comes first under a `Current environment context:` header.
pub fn build_intention_prompt(transcript: &str, context: &[String]) -> String {
    let mut prompt = String::new();
    if !context.is_empty() {
        prompt.push_str("Current environment context:\n");
        prompt.push_str(&context.join("\n"));
        prompt.push_str("\n\n");
    }
    prompt.push_str(&ANALYSIS_INSTRUCTIONS.replace("{transcript}", transcript));
    prompt
}

/// Parse an analyzer reply, keeping free text as the description when it is not JSON.
pub(crate) fn parse_analysis(content: &str) -> IntentionAnalysis {
    match serde_json::from_str::<IntentionAnalysis>(extract_json_object(content)) {
        Ok(analysis) => analysis,
        Err(error) => {
            warn!(%error, "intention reply was not JSON, keeping raw text");
            IntentionAnalysis::unparsed(content)
        }
    }
}

#[async_trait]
impl IntentionAnalyzer for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.intention.model, context = context.len()))]
    async fn analyze(
        &self,
        transcript: &str,
        context: &[String],
    ) -> ClientResult<IntentionAnalysis> {
        let body = json!({
            "model": self.intention.model,
            "messages": [{
                "role": "user",
                "content": build_intention_prompt(transcript, context),
            }],
        });
        let content = self
            .chat(body, Duration::from_millis(self.intention.timeout_ms))
            .await?;
        Ok(parse_analysis(&content))
    }
}
