// crates/core/src/llm/http_provider.rs
//! OpenAI-chat-compatible HTTP provider: the one concrete `LlmProvider`
//! this crate ships, since that is what the original implementation
//! actually drives and spec.md names no other wire format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::LlmError;

use super::config::LlmConfig;
use super::provider::LlmProvider;
use super::types::ParsedIntent;

pub struct HttpLlmProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| LlmError::NotAvailable {
            provider: "http".into(),
            reason: "no llm_endpoint configured".into(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(LlmError::RequestFailed)?;
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn system_instruction(available_categories: &[String]) -> String {
        format!(
            "You resolve an image-generation request into a structured intent. \
             Available category ids: {}. Respond with a single JSON object with \
             fields: categories (array of ids from the available list only), \
             subject (string or null), style (string or null), modifiers (object \
             of string to string), content_tier (one of \"general\", \"mature\", \
             \"explicit\", or null). Do not include any other text.",
            available_categories.join(", ")
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn parse(
        &self,
        text: &str,
        available_categories: &[String],
    ) -> Result<ParsedIntent, LlmError> {
        let system = Self::system_instruction(available_categories);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            response_format: Some(serde_json::json!({ "type": "json_object" })),
        };

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(LlmError::RequestFailed)?;
        if !response.status().is_success() {
            return Err(LlmError::InvalidFormat {
                message: format!("backend returned status {}", response.status()),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(LlmError::RequestFailed)?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| LlmError::InvalidFormat {
                message: "empty choices array".into(),
            })?;

        let mut intent: ParsedIntent =
            serde_json::from_str(content).map_err(|e| LlmError::InvalidFormat {
                message: format!("could not parse intent JSON: {e}"),
            })?;
        intent.retain_available(available_categories);
        Ok(intent)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let url = format!("{}/../health", self.endpoint.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(LlmError::InvalidFormat {
                message: format!("health probe returned status {}", resp.status()),
            }),
            Err(e) => Err(LlmError::RequestFailed(e)),
        }
    }

    fn name(&self) -> &str {
        "http"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
