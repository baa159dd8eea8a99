//! Gemini API client
//!
//! Shared by the LLM-backed responders and the optional intent model.
//! Uses a long-lived reqwest::Client for connection pooling; every call
//! carries its own timeout so no request outlives its caller's deadline.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use reqwest::Client;
use std::time::Duration;
use crate::error::OrchestrationError;

/// Reusable Gemini client (connection-pooled, cheap to clone)
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Generate response from Gemini, bounded by `timeout` when given
    pub async fn generate(
        &self,
        query: &str,
        system_prefix: Option<&str>,
        timeout: Option<Duration>,
    ) -> crate::Result<(String, f32)> {

        if self.api_key.is_empty() {
            return Err(OrchestrationError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let system_prompt = build_system_prompt(system_prefix);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: query.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_prompt,
                }],
            },
        };

        debug!("Calling Gemini API");

        let mut builder = self.client.post(&url).json(&request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(OrchestrationError::LlmError(
                format!("Gemini API error: {}", error_text)
            ));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::LlmError(format!("Gemini parse error: {}", e))
        })?;


        if gemini_response.candidates.is_empty() {
            return Err(OrchestrationError::LlmError(
                "No response from Gemini API".to_string(),
            ));
        }

        let answer = gemini_response.candidates[0]
            .content
            .parts
            .first()
            .ok_or_else(|| {
                OrchestrationError::LlmError("Empty response from Gemini".to_string())
            })?
            .text
            .clone();

        let confidence = calculate_confidence(&gemini_response);

        if let Some(usage) = &gemini_response.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                candidate_tokens = usage.candidates_token_count,
                "Gemini token usage"
            );
        }
        debug!("Gemini response received (confidence: {})", confidence);

        Ok((answer, confidence))
    }
}

/// Build system prompt with an optional responder-specific prefix
fn build_system_prompt(system_prefix: Option<&str>) -> String {
    let base_prompt = r#"You are a financial education assistant.

Guidelines:
- Provide accurate and educational financial information
- Be structured and concise
- Never give personalised investment, tax or legal advice
- Emphasize research and risk awareness
- Use plain language a beginner can follow"#;

    match system_prefix {
        Some(prefix) => format!("{}\n\n{}", base_prompt, prefix),
        None => base_prompt.to_string(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}

/// Calculate response confidence
fn calculate_confidence(response: &GeminiResponse) -> f32 {
    let base_confidence: f32 = 0.85;

    let finish_confidence = match response.candidates[0].finish_reason.as_deref() {
        Some("STOP") => 1.0,
        Some("MAX_TOKENS") => 0.8,
        Some("SAFETY") => 0.6,
        _ => 0.7,
    };

    let response_length = response.candidates[0]
        .content
        .parts
        .first()
        .map(|p| p.text.len())
        .unwrap_or(0);

    let length_confidence = if response_length < 50 {
        0.6
    } else if response_length > 2000 {
        0.8
    } else {
        1.0
    };

    (base_confidence * finish_confidence * length_confidence)
        .min(0.98)
        .max(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_appends_prefix() {
        let prompt = build_system_prompt(Some("Focus on tax education."));
        assert!(prompt.starts_with("You are a financial education assistant."));
        assert!(prompt.ends_with("Focus on tax education."));
        assert!(!build_system_prompt(None).contains("Focus"));
    }

    #[test]
    fn test_confidence_is_bounded() {
        let response = GeminiResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![Part { text: "short".to_string() }],
                },
                finish_reason: Some("SAFETY".to_string()),
            }],
            usage_metadata: None,
        };
        let confidence = calculate_confidence(&response);
        assert!((0.5..=0.98).contains(&confidence));
    }

    #[test]
    fn test_parses_api_payload() {
        let payload = r#"{
            "candidates": [{
                "content": {
                    "parts": [{"text": "An index fund holds every security in a market index, so it tracks that index at low cost."}],
                    "role": "model"
                },
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {
                "promptTokenCount": 42,
                "candidatesTokenCount": 21,
                "totalTokenCount": 63
            }
        }"#;

        let response: GeminiResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(response.candidates[0].finish_reason.as_deref(), Some("STOP"));
        let usage = response.usage_metadata.as_ref().unwrap();
        assert_eq!((usage.prompt_token_count, usage.candidates_token_count), (42, 21));
        assert!(calculate_confidence(&response) > 0.595);
    }

    #[test]
    fn test_request_uses_api_field_names() {
        let request = GeminiRequest {
            contents: vec![],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction { parts: vec![] },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
        assert!(json.get("systemInstruction").is_some());
    }

    #[tokio::test]
    async fn test_missing_key_is_llm_error() {
        let client = GeminiClient::new(String::new());
        assert!(!client.is_configured());
        let result = client
            .generate("What is a bond?", None, Some(Duration::from_secs(1)))
            .await;
        assert!(matches!(result, Err(OrchestrationError::LlmError(_))));
    }
}
