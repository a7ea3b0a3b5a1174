use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::TextProvider;
use crate::error::GenerationError;

/// Ollama `/api/generate` over blocking HTTP, non-streaming.
pub struct OllamaProvider {
    client: Client,
    url: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaProvider {
    pub fn new(
        url: &str,
        model: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
            temperature,
        })
    }
}

impl TextProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let data: GenerateResponse = resp
            .json()
            .map_err(|e| GenerationError::Transient(format!("undecodable response: {e}")))?;
        let text = data.response.trim();
        if text.is_empty() {
            return Err(GenerationError::Transient("empty response".to_string()));
        }
        Ok(text.to_string())
    }
}

fn classify_transport(e: reqwest::Error) -> GenerationError {
    if e.is_builder() {
        GenerationError::Permanent(format!("invalid request: {e}"))
    } else if e.is_timeout() {
        GenerationError::Transient(format!("request timed out: {e}"))
    } else {
        GenerationError::Transient(format!("request failed: {e}"))
    }
}

/// 408, 429 and 5xx are worth retrying; any other error status is not.
fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    let snippet: String = body.chars().take(200).collect();
    let msg = format!("provider returned {status}: {snippet}");
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        GenerationError::Transient(msg)
    } else {
        GenerationError::Permanent(msg)
    }
}
