use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::models::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part,
};
use crate::prompt::Prompt;
use crate::MatchError;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// One round trip to a generative model. Returns the raw response text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> Result<String, MatchError>;
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Google Generative Language API client (`generateContent`, JSON mode).
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, MatchError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            api_key: config.api_key,
            model: config.model,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, MatchError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.text.clone()),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: prompt.response_schema.clone(),
            },
        };

        tracing::debug!(
            model = %self.model,
            prompt = prompt.name,
            prompt_length = prompt.text.len(),
            "calling generative model"
        );

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                %status,
                prompt = prompt.name,
                body = %body,
                "generative model request failed"
            );
            return Err(MatchError::Model(format!("model returned {status}: {body}")));
        }

        let parsed: GenerateContentResponse = resp.json().await?;
        tracing::debug!(
            prompt = prompt.name,
            usage = ?parsed.usage_metadata,
            "model response received"
        );

        parsed.text().ok_or_else(|| {
            let reason = parsed
                .candidates
                .first()
                .and_then(|c| c.finish_reason.clone())
                .unwrap_or_else(|| "no candidates".to_string());
            MatchError::Model(format!("model returned no text ({reason})"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_never_contains_the_key() {
        let config = GeminiConfig::new("AIza-very-secret");
        assert!(!format!("{config:?}").contains("very-secret"));
        let client = GeminiClient::new(config).expect("client");
        assert!(!format!("{client:?}").contains("very-secret"));
    }

    #[test]
    fn endpoint_targets_the_configured_model() {
        let mut config = GeminiConfig::new("k");
        config.base_url = "http://localhost:9999/v1beta/".into();
        config.model = "gemini-test".into();
        let client = GeminiClient::new(config).expect("client");
        assert_eq!(
            client.endpoint(),
            "http://localhost:9999/v1beta/models/gemini-test:generateContent"
        );
    }

    #[test]
    fn response_text_joins_parts_of_first_candidate() {
        let raw = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"text": "{\"summary\":"}, {"text": "\"ok\"}"}]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "totalTokenCount": 20}
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.text().as_deref(), Some(r#"{"summary":"ok"}"#));

        let empty: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#).expect("parse");
        assert_eq!(empty.text(), None);
    }
}
