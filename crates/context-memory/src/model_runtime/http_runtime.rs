//! OpenAI-compatible chat completion client
//!
//! Posts the whole turn prompt as a single user message to a local
//! llama-server style backend and returns the first choice.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::runtime_trait::LanguageModel;

const MODEL_NAME: &str = "local-llm";
const MAX_TOKENS: u32 = 2000;
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

pub struct HttpLanguageModel {
    backend_url: String,
    http_client: reqwest::Client,
}

impl HttpLanguageModel {
    pub fn new(backend_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let backend_url = backend_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        info!("HTTP language model using backend: {}", backend_url);
        Ok(Self { backend_url, http_client })
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.backend_url)
    }

    fn build_request(prompt: &str) -> ChatCompletionRequest<'static> {
        ChatCompletionRequest {
            model: MODEL_NAME,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            stream: false,
        }
    }

    fn first_choice(completion: ChatCompletionResponse) -> String {
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        debug!("Requesting completion for a {} character prompt", prompt.len());
        let response = self
            .http_client
            .post(self.completions_url())
            .json(&Self::build_request(prompt))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("LLM backend request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("LLM backend returned {}: {}", status, body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {}", e))?;
        Ok(Self::first_choice(completion))
    }

    fn name(&self) -> &str {
        "http"
    }
}
