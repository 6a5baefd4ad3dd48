//! Groq verdict provider over the OpenAI-compatible chat API

use super::prompt::{build_prompt, parse_verdict, SYSTEM_PROMPT};
use super::VerdictProvider;
use crate::config::ProviderConfig;
use crate::error::{FetchError, NarrativeError};
use crate::sources::http::{check_status, decode_json, send_with_retry, Forbidden};
use crate::types::{AnalysisResult, Verdict};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct GroqProvider {
    client: Client,
    base_url: String,
    model: String,
    label: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl GroqProvider {
    pub fn new(client: Client, base_url: &str, config: &ProviderConfig) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            label: config.label.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    async fn complete(&self, api_key: &str, prompt: &str) -> Result<String, FetchError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let request = self.client.post(&url).bearer_auth(api_key).json(&body);

        let response = send_with_retry(&self.label, request, 0, Duration::ZERO).await?;
        let response = check_status(&self.label, response, Forbidden::CheckHeaders)?;
        let payload: ChatResponse = decode_json(&self.label, response).await?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| FetchError::malformed(&self.label, "Response contained no choices"))
    }
}

#[async_trait]
impl VerdictProvider for GroqProvider {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate(&self, result: &AnalysisResult) -> Result<Verdict, NarrativeError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| NarrativeError::Unconfigured {
            provider: self.label.clone(),
        })?;

        debug!("Requesting verdict for {} from {}", result.package, self.label);
        let text = self
            .complete(api_key, &build_prompt(result))
            .await
            .map_err(|e| NarrativeError::from_fetch(&self.label, e))?;

        let mut verdict = parse_verdict(&self.label, &text)?;
        verdict.model = Some(self.label.clone());
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkConfig, ProviderKind};
    use crate::narrative::tests::sample_result;
    use crate::sources::http::build_client;
    use crate::types::Rating;
    use mockito::Matcher;
    use serde_json::json;

    fn provider_for(server: &mockito::ServerGuard) -> GroqProvider {
        let mut config = ProviderConfig::new(
            ProviderKind::Groq,
            "llama-3.3-70b-versatile",
            "Llama 3.3 70B (Groq)",
        );
        config.api_key = Some("gsk_test".to_string());
        let client = build_client(&NetworkConfig::default()).unwrap();
        GroqProvider::new(client, &server.url(), &config)
    }

    #[tokio::test]
    async fn test_generate_verdict() {
        let mut server = mockito::Server::new_async().await;
        let content = json!({
            "summary": "Widely used but stale.",
            "recommendation": "use-with-caution",
            "maintenanceRating": "poor"
        })
        .to_string();
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer gsk_test")
            .match_body(Matcher::PartialJson(json!({
                "model": "llama-3.3-70b-versatile",
                "max_tokens": 2048
            })))
            .with_status(200)
            .with_body(
                json!({
                    "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let verdict = provider_for(&server).generate(&sample_result()).await.unwrap();

        assert_eq!(verdict.maintenance_rating, Rating::Poor);
        assert_eq!(verdict.model.as_deref(), Some("Llama 3.3 70B (Groq)"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_stops() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .create_async()
            .await;

        let err = provider_for(&server).generate(&sample_result()).await.unwrap_err();
        assert!(matches!(err, NarrativeError::Provider { .. }));
        assert!(!err.allows_fallback());
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let err = provider_for(&server).generate(&sample_result()).await.unwrap_err();
        assert!(matches!(err, NarrativeError::Malformed { .. }));
    }
}
