//! HTTP text-generation providers for the composer chain.
//!
//! Each provider is one `TextGenProvider`; the chain is an ordered list built
//! from config, so adding a vendor means appending an entry, not branching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::MonitorError;
use super::traits::TextGenProvider;
use crate::config::{ProviderConfig, ProviderKind};

const SYSTEM_PROMPT: &str =
    "You write brief, calm patient notifications. Never give a diagnosis. Output plain text only.";

fn http_client(name: &str) -> Result<reqwest::Client, MonitorError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| MonitorError::provider(name, format!("cannot build HTTP client: {e}")))
}

fn map_send_error(name: &str, endpoint: &str, timeout: Duration, e: reqwest::Error) -> MonitorError {
    if e.is_timeout() {
        MonitorError::ProviderTimeout {
            provider: name.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if e.is_connect() {
        MonitorError::provider(name, format!("cannot connect to {endpoint}"))
    } else {
        MonitorError::provider(name, e.to_string())
    }
}

async fn check_status(name: &str, response: reqwest::Response) -> Result<reqwest::Response, MonitorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MonitorError::provider(
        name,
        format!("status {}: {}", status.as_u16(), body.chars().take(200).collect::<String>()),
    ))
}

// ═══════════════════════════════════════════
// OpenAI-compatible chat completions
// ═══════════════════════════════════════════

pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    max_response_len: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
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
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, MonitorError> {
        Ok(Self {
            name: config.name.clone(),
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.resolve_api_key(),
            timeout: config.timeout(),
            max_response_len: config.max_response_len,
            client: http_client(&config.name)?,
        })
    }
}

#[async_trait]
impl TextGenProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn max_response_len(&self) -> usize {
        self.max_response_len
    }

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, MonitorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            max_tokens: 120,
            temperature: 0.4,
        };

        let mut request = self.client.post(&url).timeout(timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(&self.name, &self.base_url, timeout, e))?;
        let response = check_status(&self.name, response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::provider(&self.name, format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| MonitorError::provider(&self.name, "response had no choices"))
    }
}

// ═══════════════════════════════════════════
// Ollama /api/generate
// ═══════════════════════════════════════════

pub struct OllamaProvider {
    name: String,
    base_url: String,
    model: String,
    timeout: Duration,
    max_response_len: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl OllamaProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, MonitorError> {
        Ok(Self {
            name: config.name.clone(),
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.timeout(),
            max_response_len: config.max_response_len,
            client: http_client(&config.name)?,
        })
    }
}

#[async_trait]
impl TextGenProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn max_response_len(&self) -> usize {
        self.max_response_len
    }

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, MonitorError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            system: SYSTEM_PROMPT,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(&self.name, &self.base_url, timeout, e))?;
        let response = check_status(&self.name, response).await?;

        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::provider(&self.name, format!("malformed response: {e}")))?;

        Ok(parsed.response)
    }
}

/// Build the ordered provider chain from config.
pub fn build_providers(configs: &[ProviderConfig]) -> Result<Vec<Arc<dyn TextGenProvider>>, MonitorError> {
    configs
        .iter()
        .map(|c| -> Result<Arc<dyn TextGenProvider>, MonitorError> {
            Ok(match c.kind {
                ProviderKind::OpenaiCompatible => Arc::new(OpenAiCompatibleProvider::from_config(c)?),
                ProviderKind::Ollama => Arc::new(OllamaProvider::from_config(c)?),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::composer::NotificationComposer;
    use crate::monitor::testing::medication_candidate;
    use crate::monitor::types::TextOrigin;

    fn provider_config(name: &str, kind: ProviderKind, endpoint: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind,
            endpoint: endpoint.to_string(),
            model: "test-model".to_string(),
            api_key: None,
            api_key_env: None,
            timeout_ms: 300,
            max_response_len: 180,
        }
    }

    #[test]
    fn builds_chain_in_config_order() {
        let chain = build_providers(&[
            provider_config("cloud", ProviderKind::OpenaiCompatible, "https://api.example.com/v1/"),
            provider_config("local", ProviderKind::Ollama, "http://localhost:11434"),
        ])
        .unwrap();

        let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["cloud", "local"]);
        assert_eq!(chain[0].timeout(), Duration::from_millis(300));
        assert_eq!(chain[1].max_response_len(), 180);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let p = OpenAiCompatibleProvider::from_config(&provider_config(
            "cloud",
            ProviderKind::OpenaiCompatible,
            "https://api.example.com/v1/",
        ))
        .unwrap();
        assert_eq!(p.base_url, "https://api.example.com/v1");
    }

    #[tokio::test]
    async fn unreachable_endpoints_fall_back_to_template() {
        // Port 9 (discard) on localhost is not expected to host an HTTP server.
        let chain = build_providers(&[
            provider_config("cloud", ProviderKind::OpenaiCompatible, "http://127.0.0.1:9"),
            provider_config("local", ProviderKind::Ollama, "http://127.0.0.1:9"),
        ])
        .unwrap();
        let composer = NotificationComposer::new(chain, 220);

        let composed = composer.compose(&medication_candidate("14:00")).await;
        assert_eq!(composed.origin, TextOrigin::Template);
        assert!(composed.body.contains("Metformin"));
    }

    #[test]
    fn parses_chat_response_shape() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "Take Metformin at 14:00."}}]}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("Take Metformin at 14:00.")
        );
    }
}
