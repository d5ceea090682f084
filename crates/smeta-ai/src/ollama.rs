//! HTTP backend for a local Ollama server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::BackendError;
use crate::extractor::ExtractionBackend;
use crate::prompt::ExtractionPrompt;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen3:30b";

/// Ollama `/api/generate` client. Deterministic sampling, JSON output mode.
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    num_predict: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'static str,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaBackend {
    /// `base_url` should be like `http://localhost:11434` (a trailing slash is dropped).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            num_predict: 1024,
        }
    }

    pub fn with_num_predict(mut self, num_predict: u32) -> Self {
        self.num_predict = num_predict;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(&'a self, prompt: &'a ExtractionPrompt) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            system: &prompt.system,
            prompt: &prompt.user,
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: 0.0,
                num_predict: self.num_predict,
            },
        }
    }
}

#[async_trait]
impl ExtractionBackend for OllamaBackend {
    async fn complete(&self, prompt: &ExtractionPrompt) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(url = %url, model = %self.model, strict = prompt.strict, "calling ollama");

        let resp = self.client.post(&url).json(&self.request(prompt)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let result: GenerateResponse = resp.json().await?;
        info!(model = %self.model, chars = result.response.len(), "ollama completion received");
        Ok(result.response)
    }
}
