use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::memory::{ChatTurn, Role};

pub const TEMPERATURE: f32 = 0.8;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: &'static str,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }
}

impl From<&ChatTurn> for Message {
    fn from(turn: &ChatTurn) -> Self {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self { role, content: turn.content.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Text-in/text-out chat model. `Ok(None)` means the call succeeded but
/// produced no choice.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<Option<String>>;
}

/// Groq's OpenAI-compatible chat completions endpoint.
pub struct GroqClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl GroqClient {
    /// `None` when no API key is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let Some(api_key) = config.groq_api_key.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder().timeout(Duration::from_secs(config.upstream_timeout_secs)).build()?;
        Ok(Some(Self {
            client,
            api_key,
            model: config.groq_model.clone(),
            base_url: config.groq_base_url.trim_end_matches('/').to_string(),
        }))
    }

    async fn send(&self, req: CompletionRequest) -> Result<Option<String>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionBody { model: &self.model, messages: &req.messages, max_tokens: req.max_tokens, temperature: req.temperature };
        let resp = self.client.post(&url).bearer_auth(&self.api_key).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("groq error {}: {}", status, text));
        }
        let parsed: ChatCompletionResponse = resp.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string()))
    }
}

#[async_trait]
impl ChatModel for GroqClient {
    async fn complete(&self, req: CompletionRequest) -> Result<Option<String>> {
        self.send(req).await
    }
}
