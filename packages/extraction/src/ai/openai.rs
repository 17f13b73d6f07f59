//! OpenAI-compatible implementation of the `Extractor` trait.
//!
//! Works against any chat-completions endpoint that supports JSON mode
//! (OpenAI, Azure, vLLM, Ollama's OpenAI bridge).
//!
//! # Example
//!
//! ```rust,ignore
//! use csrd_extraction::ai::OpenAiExtractor;
//!
//! let extractor = OpenAiExtractor::new("sk-...").with_model("gpt-4o");
//! let orchestrator = Orchestrator::new(Arc::new(extractor), store, catalog);
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credentials::ApiKey;
use crate::error::{ExtractionError, Result};
use crate::pipeline::{
    build_extraction_prompt, build_verification_prompt, parse_model_reply,
    parse_verification_reply, SYSTEM_PROMPT,
};
use crate::traits::extractor::{ExtractionRequest, Extractor, Verification, VerificationRequest};
use crate::types::observation::Observation;

/// Extractor backed by an OpenAI-compatible chat-completions API.
#[derive(Clone)]
pub struct OpenAiExtractor {
    client: Client,
    api_key: ApiKey,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiExtractor {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: ApiKey::new(api_key),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.0,
            max_tokens: Some(4096),
        }
    }

    /// Create from environment variable `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ExtractionError::Config("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set the chat model (default: gpt-4o-mini).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (for Azure, proxies, local servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the sampling temperature (default: 0.0).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the completion token limit (`None` for the server default).
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Get the current model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// One JSON-mode chat completion.
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(ExtractionError::Config("API key is empty".into()));
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Service(
                format!("OpenAI API error ({}): {}", status, error_text).into(),
            ));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            ExtractionError::InvalidReply(format!("Unreadable completion body: {}", e))
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ExtractionError::EmptyReply)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ExtractionError {
    if e.is_timeout() {
        ExtractionError::Service(format!("request timed out: {}", e).into())
    } else {
        ExtractionError::Service(Box::new(e))
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<Vec<Observation>> {
        let prompt = build_extraction_prompt(request);
        debug!(
            company = request.company,
            chunk = %request.chunk.label(),
            indicators = request.indicators.len(),
            prompt_chars = prompt.len(),
            "Sending extraction prompt"
        );

        let reply = self.chat(SYSTEM_PROMPT, &prompt).await?;
        parse_model_reply(&reply, request)
    }

    async fn verify(&self, request: &VerificationRequest<'_>) -> Result<Option<Verification>> {
        let prompt = build_verification_prompt(request);
        debug!(
            company = request.company,
            indicator_id = %request.indicator.id,
            value = request.value,
            "Sending verification prompt"
        );

        let reply = self.chat(SYSTEM_PROMPT, &prompt).await?;
        parse_verification_reply(&reply).map(Some)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// OpenAI API types

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
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
    content: Option<String>,
}
