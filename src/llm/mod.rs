//! LLM integration for summarization and blog writing
//!
//! Talks to a local Ollama server (`/api/generate`) or any OpenAI-compatible
//! chat-completions endpoint.

use crate::config::{LlmConfig, LlmProvider};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// LLM client for making API calls
pub struct LlmClient {
    client: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl LlmClient {
    /// Build a client for a model-backed provider. `basic` has no model to
    /// call and is rejected here.
    pub fn new(config: &LlmConfig) -> Result<Self, String> {
        let base_url = match config.provider {
            LlmProvider::Ollama => config.ollama_base_url.clone(),
            LlmProvider::Openai => {
                if config.openai_api_key.is_none() {
                    return Err("OPENAI_API_KEY is not set".to_string());
                }
                config.openai_base_url.clone()
            }
            LlmProvider::Basic => {
                return Err("the basic provider does not use an LLM".to_string());
            }
        };

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            provider: config.provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.openai_api_key.clone(),
            temperature: 0.3,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a completion from the configured provider
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, String> {
        log::info!(
            "Sending request to {}: model={}, prompt_len={}",
            self.provider,
            self.model,
            prompt.len()
        );

        let text = match self.provider {
            LlmProvider::Ollama => self.generate_ollama(prompt, system).await?,
            LlmProvider::Openai => self.generate_openai(prompt, system).await?,
            LlmProvider::Basic => return Err("the basic provider does not use an LLM".to_string()),
        };

        if text.trim().is_empty() {
            return Err(format!("{} returned an empty response", self.provider));
        }
        Ok(text)
    }

    async fn generate_ollama(&self, prompt: &str, system: Option<&str>) -> Result<String, String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            system: system.map(|s| s.to_string()),
            stream: false,
            options: Some(GenerateOptions {
                temperature: self.temperature,
                num_predict: 2048,
            }),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Failed to call Ollama: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Ollama returned {}: {}", status, body));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Ollama response: {}", e))?;

        log::info!(
            "Ollama response received: {} chars, eval_duration={:?}ms",
            result.response.len(),
            result.eval_duration.map(|d| d / 1_000_000)
        );

        Ok(result.response)
    }

    async fn generate_openai(&self, prompt: &str, system: Option<&str>) -> Result<String, String> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| format!("Failed to call OpenAI: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("OpenAI returned {}: {}", status, body));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse OpenAI response: {}", e))?;

        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| "OpenAI response had no choices".to_string())
    }
}

/// Extract JSON from LLM response (handles markdown code blocks)
pub fn extract_json_from_response(response: &str) -> Option<serde_json::Value> {
    let trimmed = response.trim();

    // Try direct parse first
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(json);
    }

    // Try to extract from markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after_marker = &trimmed[start + 7..];
        if let Some(end) = after_marker.find("```") {
            let json_str = after_marker[..end].trim();
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(json_str) {
                return Some(json);
            }
        }
    }

    // Try to find JSON object in response
    if let Some(start) = trimmed.find('{') {
        // Find matching closing brace
        let mut depth = 0;
        let mut end = start;
        for (i, c) in trimmed[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if end > start {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&trimmed[start..end]) {
                return Some(json);
            }
        }
    }

    None
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_duration: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: LlmProvider, key: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            model: "test-model".to_string(),
            ollama_base_url: "http://localhost:11434/".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_api_key: key.map(|k| k.to_string()),
        }
    }

    #[test]
    fn test_extract_json_from_response() {
        // Direct JSON
        let json = extract_json_from_response(r#"{"name": "test"}"#);
        assert!(json.is_some());

        // Markdown code block
        let json = extract_json_from_response(
            r#"Here's the result:
```json
{"items": [1, 2, 3]}
```
"#,
        );
        assert!(json.is_some());

        // JSON embedded in text
        let json =
            extract_json_from_response(r#"The extracted data is: {"value": 42} and that's it."#);
        assert_eq!(json.unwrap()["value"], 42);

        assert!(extract_json_from_response("no json here").is_none());
    }

    #[test]
    fn test_extract_json_after_multibyte_prefix() {
        let json = extract_json_from_response(r#"Résumé → {"summary": "ok"}"#);
        assert_eq!(json.unwrap()["summary"], "ok");
    }

    #[test]
    fn test_client_construction_by_provider() {
        let ollama = LlmClient::new(&config(LlmProvider::Ollama, None)).unwrap();
        assert_eq!(ollama.base_url, "http://localhost:11434");
        assert_eq!(ollama.model(), "test-model");

        assert!(LlmClient::new(&config(LlmProvider::Openai, None)).is_err());
        assert!(LlmClient::new(&config(LlmProvider::Openai, Some("sk-x"))).is_ok());
        assert!(LlmClient::new(&config(LlmProvider::Basic, None)).is_err());
    }
}
