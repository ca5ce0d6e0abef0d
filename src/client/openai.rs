//! OpenAI-compatible chat completions client.
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use ureq::Agent;

use super::AiClient;
use crate::error::ProviderError;
use crate::util::preview;

/// Resolved connection settings (API key already looked up).
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompatibleClient {
    settings: OpenAiSettings,
    agent: Agent,
}

impl OpenAiCompatibleClient {
    pub fn new(settings: OpenAiSettings) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(settings.timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { settings, agent }
    }

    pub fn settings(&self) -> &OpenAiSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.settings.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        })
    }
}

impl AiClient for OpenAiCompatibleClient {
    fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        let start = Instant::now();
        let mut request = self
            .agent
            .post(self.endpoint())
            .header("Content-Type", "application/json");
        if let Some(key) = &self.settings.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        let mut response = request
            .send_json(self.request_body(prompt))
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(transport_error)?;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            elapsed_ms,
            status,
            model = %self.settings.model,
            prompt_bytes = prompt.len(),
            response_bytes = body.len(),
            "lm invoke complete"
        );

        if !(200..300).contains(&status) {
            tracing::debug!(status, body = %preview(&body, 500), "provider error body");
            return Err(ProviderError::from_status(status, body));
        }
        extract_content(&body)
    }

    fn describe(&self) -> String {
        format!("{} at {}", self.settings.model, self.settings.base_url)
    }
}

fn transport_error(err: ureq::Error) -> ProviderError {
    ProviderError::transient(format!("provider request failed: {err}"))
}

/// `choices[0].message.content` of a chat completion body.
fn extract_content(body: &str) -> Result<String, ProviderError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|err| {
        ProviderError::fatal(format!("parse chat completion JSON: {err}")).with_raw_response(body)
    })?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ProviderError::transient("provider returned empty content").with_raw_response(body));
    }
    Ok(content)
}
