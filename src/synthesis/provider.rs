//! Code-Synthesis Provider
//!
//! The external text-to-code backend. No schema guarantee on responses:
//! whatever comes back is untrusted text for the extraction and sandbox
//! layers to deal with.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;

/// Provider failures. All of them are absorbed by the synthesis fallback.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider not configured: ANTHROPIC_API_KEY not set")]
    NotConfigured,
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected response format")]
    UnexpectedFormat,
}

/// Free-form text in, free-form text out
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic-messages-shaped HTTP provider
#[derive(Clone)]
pub struct HttpSynthesisProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
}

impl HttpSynthesisProvider {
    pub fn new(api_key: Option<&str>, model: &str, url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
            url: url.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.anthropic_api_key.as_deref(),
            &config.synth_model,
            &config.synth_url,
        )
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl SynthesisProvider for HttpSynthesisProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or(ProviderError::NotConfigured)?;

        debug!("Calling synthesis provider: model={}, prompt_len={}", self.model, prompt.len());

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "model": self.model,
                "max_tokens": 1024,
                "messages": [
                    {"role": "user", "content": prompt}
                ]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let result: MessageResponse = response
            .json()
            .await
            .map_err(|_| ProviderError::UnexpectedFormat)?;

        let text = result
            .content
            .into_iter()
            .filter_map(|b| if b.r#type == "text" { b.text } else { None })
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return Err(ProviderError::UnexpectedFormat);
        }

        info!("Provider response: model={}, response_len={}", self.model, text.len());
        Ok(text)
    }
}
