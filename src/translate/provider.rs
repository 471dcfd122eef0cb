use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{ProviderKind, TranslateConfig};
use crate::error::{Result, SubforgeError};
use super::TranslationProvider;

/// Sampling temperature used for every translation request
const TEMPERATURE: f32 = 0.3;

fn build_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn map_send_error(error: reqwest::Error, timeout_secs: u64) -> SubforgeError {
    if error.is_timeout() {
        SubforgeError::ProviderTimeout(timeout_secs)
    } else {
        SubforgeError::Http(error)
    }
}

async fn check_status(response: reqwest::Response, timeout_secs: u64) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(300).collect();
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => SubforgeError::RateLimited(body),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => SubforgeError::ProviderTimeout(timeout_secs),
        _ => SubforgeError::Provider(format!("API error {}: {}", status, body)),
    })
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Any service speaking the OpenAI `/chat/completions` dialect
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &TranslateConfig) -> Self {
        let api_key = match (config.api_key.trim(), config.provider) {
            ("", ProviderKind::Ollama) => "ollama".to_string(),
            (key, _) => key.to_string(),
        };

        Self {
            client: build_client(config.timeout_secs),
            base_url: config.effective_base_url(),
            api_key,
            model: config.effective_model(),
            timeout_secs: config.timeout_secs,
        }
    }

    /// Verify the endpoint answers and the key is accepted
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url);
        let mut request = self.client.get(&url);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;
        check_status(response, self.timeout_secs).await?;

        info!("Provider at {} is reachable (model {})", self.base_url, self.model);
        Ok(())
    }
}

#[async_trait]
impl TranslationProvider for OpenAiCompatibleProvider {
    async fn translate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: TEMPERATURE,
            stream: false,
        };

        debug!("Sending translation request to: {}", url);

        let mut request = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;
        let response = check_status(response, self.timeout_secs).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| SubforgeError::Provider(format!("Failed to parse response: {}", e)))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(SubforgeError::Provider("Empty translation received".to_string()));
        }
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Ollama through its native `/api/generate` endpoint
pub struct OllamaProvider {
    client: Client,
    endpoint: String,
    model: String,
    timeout_secs: u64,
}

impl OllamaProvider {
    pub fn new(config: &TranslateConfig) -> Self {
        Self {
            client: build_client(config.timeout_secs),
            endpoint: config.effective_base_url(),
            model: config.effective_model(),
            timeout_secs: config.timeout_secs,
        }
    }

    /// Check that Ollama runs and the model has been pulled
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/show", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": self.model }))
            .send()
            .await
            .map_err(|e| SubforgeError::Provider(format!("Failed to connect to Ollama: {}", e)))?;

        if response.status().is_success() {
            info!("Ollama model '{}' is available", self.model);
            Ok(())
        } else {
            Err(SubforgeError::Provider(format!(
                "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
                self.model, self.model
            )))
        }
    }
}

#[async_trait]
impl TranslationProvider for OllamaProvider {
    async fn translate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.endpoint);
        let request = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": TEMPERATURE },
        });

        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;
        let response = check_status(response, self.timeout_secs).await?;

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SubforgeError::Provider(format!("Failed to parse response: {}", e)))?;

        let raw_response = generated.response.trim().to_string();
        if raw_response.is_empty() {
            return Err(SubforgeError::Provider("Empty translation received".to_string()));
        }
        Ok(raw_response)
    }
}
