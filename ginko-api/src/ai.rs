use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::errors::{AppError, AppResult};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSuggestion {
    pub id: String,
    pub title: String,
}

/// Delegates epic decomposition to an external LLM. Modeled after the
/// teacher's `billing.rs::report_to_stripe` outbound `reqwest` call: a thin
/// client wrapping one external HTTP integration, validated and passed
/// through rather than trusted verbatim.
#[derive(Clone)]
pub struct EpicDecomposer {
    client: Client,
    api_key: Option<String>,
}

impl EpicDecomposer {
    pub fn new(api_key: Option<String>) -> Self {
        Self { client: Client::new(), api_key }
    }

    /// `POST /epic/decompose`: the core validates and passes through, it
    /// never invents task suggestions itself when the provider is absent.
    pub async fn decompose(&self, epic_title: &str, epic_content: &str) -> AppResult<Vec<TaskSuggestion>> {
        let api_key = self.api_key.as_ref().ok_or(AppError::AiServiceNotConfigured)?;

        let prompt = format!(
            "Decompose the following epic into a short list of concrete engineering tasks. \
             Respond with ONLY a JSON array of objects shaped {{\"id\": \"TASK-n\", \"title\": \"...\"}}, \
             no prose.\n\nEpic title: {epic_title}\nEpic content:\n{epic_content}"
        );

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": MODEL,
                "max_tokens": 1024,
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send()
            .await
            .map_err(|e| AppError::AiServiceError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body, "anthropic decompose request failed");
            return Err(AppError::AiServiceError(format!("provider returned {status}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| AppError::AiServiceError(e.to_string()))?;

        let text = parsed
            .content
            .first()
            .map(|block| block.text.as_str())
            .unwrap_or_default();

        serde_json::from_str(text.trim())
            .map_err(|e| AppError::AiServiceError(format!("unparseable suggestion list: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_api_key_is_a_clean_not_configured_error() {
        let decomposer = EpicDecomposer::new(None);
        let err = decomposer.decompose("EPIC-001", "some content").await.unwrap_err();
        assert!(matches!(err, AppError::AiServiceNotConfigured));
    }
}
