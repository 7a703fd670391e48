use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat completion seam so the interpretation stage can be driven without
/// a live endpoint.
pub trait ChatService {
    fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
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

/// Client for an OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiChat {
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiChat {
    /// * `base_url` - endpoint root, e.g. `https://api.openai.com/v1`
    /// * `model` - model identifier sent with each request
    /// * `api_key_env` - environment variable holding the bearer token
    pub fn from_env(base_url: &str, model: &str, api_key_env: &str) -> anyhow::Result<Self> {
        let api_key = std::env::var(api_key_env)
            .with_context(|| format!("API key environment variable {} is not set", api_key_env))?;
        if api_key.trim().is_empty() {
            anyhow::bail!("API key environment variable {} is empty", api_key_env);
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }
}

impl ChatService for OpenAiChat {
    fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            anyhow::bail!("chat endpoint returned {}: {}", status, text.trim());
        }

        let parsed: ChatResponse = response.json().context("malformed chat response body")?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow::anyhow!("chat response carried no content"))?;
        Ok(content)
    }
}
