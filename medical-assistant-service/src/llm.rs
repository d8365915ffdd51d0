use anyhow::anyhow;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::LlmConfig;

const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const VISION_MAX_TOKENS: u32 = 1000;

/// An image handed to a vision-capable model.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ImageInput {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }
}

/// Chat-completion provider seam.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send `prompt` as a single user message and return the reply text.
    async fn complete(&self, model: &str, prompt: &str) -> anyhow::Result<String>;

    /// Ask a vision model about an image.
    async fn describe_image(
        &self,
        model: &str,
        prompt: &str,
        image: &ImageInput,
    ) -> anyhow::Result<String>;

    /// Best-effort completion: failures are logged and come back as `None`.
    async fn try_complete(&self, model: &str, prompt: &str) -> Option<String> {
        match self.complete(model, prompt).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(model = %model, "Completion failed: {}", e);
                None
            }
        }
    }
}

/// OpenRouter-backed client. The credential is supplied at construction.
pub struct OpenRouterClient {
    client: openrouter::Client,
    http: Client,
    api_key: String,
    timeout: Duration,
}

impl OpenRouterClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client: openrouter::Client::new(&config.api_key),
            http,
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let agent = self.client.agent(model).build();
        let reply = tokio::time::timeout(self.timeout, agent.prompt(prompt.to_string()))
            .await
            .map_err(|_| anyhow!("completion timed out after {:?}", self.timeout))??;

        if reply.trim().is_empty() {
            return Err(anyhow!("model {} returned an empty completion", model));
        }

        info!(model = %model, "Completion received ({} characters)", reply.len());
        Ok(reply)
    }

    async fn describe_image(
        &self,
        model: &str,
        prompt: &str,
        image: &ImageInput,
    ) -> anyhow::Result<String> {
        let payload = vision_payload(model, prompt, image);

        let response = self
            .http
            .post(OPENROUTER_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("LLM API request failed: {}", response.status()));
        }

        let response_json: Value = response.json().await?;
        let content = reply_content(&response_json)?;

        info!(
            model = %model,
            "Image analysis received ({} characters)",
            content.len()
        );
        Ok(content)
    }
}

fn vision_payload(model: &str, prompt: &str, image: &ImageInput) -> Value {
    json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image.data_url() } }
                ]
            }
        ],
        "max_tokens": VISION_MAX_TOKENS
    })
}

fn reply_content(response_json: &Value) -> anyhow::Result<String> {
    let content = response_json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| anyhow!("Invalid response format from LLM"))?;
    if content.trim().is_empty() {
        return Err(anyhow!("LLM returned an empty reply"));
    }
    Ok(content.to_string())
}
