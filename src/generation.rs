//! Completion provider abstraction for response generation.
//!
//! The chat engine only sees the [`CompletionProvider`] trait; the concrete
//! backend is chosen by `generation.provider` in the config. The disabled
//! backend errors on every call, which routes each turn through the chat
//! engine's fallback response.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;

/// Generates one assistant reply from a system prompt and a user prompt.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// Create the provider named by the configuration.
pub fn create_provider(config: &GenerationConfig) -> Result<Box<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiCompletions::new(config)?)),
        "disabled" => Ok(Box::new(DisabledCompletions)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Errors on every call; selected when `generation.provider = "disabled"`.
pub struct DisabledCompletions;

#[async_trait]
impl CompletionProvider for DisabledCompletions {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

/// Chat completions via `POST /v1/chat/completions`.
///
/// A single attempt per turn: a conversational reply is latency-bound, so
/// a failed call degrades to the fallback response instead of retrying.
pub struct OpenAiCompletions {
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompletions {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletions {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let content = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))?;

        Ok(content.trim().to_string())
    }
}
