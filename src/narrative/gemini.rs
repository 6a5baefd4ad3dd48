//! Google Generative Language (Gemini) verdict provider

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

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    model: String,
    label: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiProvider {
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
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: SYSTEM_PROMPT }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body);

        // Rate limits go to the next provider instead of being retried
        let response = send_with_retry(&self.label, request, 0, Duration::ZERO).await?;
        let response = check_status(&self.label, response, Forbidden::CheckHeaders)?;
        let payload: GenerateResponse = decode_json(&self.label, response).await?;

        let text: String = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(FetchError::malformed(&self.label, "Response contained no text"));
        }
        Ok(text)
    }
}

#[async_trait]
impl VerdictProvider for GeminiProvider {
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
    use crate::types::Recommendation;
    use mockito::Matcher;

    fn provider_for(server: &mockito::ServerGuard, api_key: Option<&str>) -> GeminiProvider {
        let mut config = ProviderConfig::new(ProviderKind::Gemini, "gemini-2.5-flash", "Gemini 2.5 Flash");
        config.api_key = api_key.map(String::from);
        let client = build_client(&NetworkConfig::default()).unwrap();
        GeminiProvider::new(client, &server.url(), &config)
    }

    #[tokio::test]
    async fn test_generate_verdict() {
        let mut server = mockito::Server::new_async().await;
        let answer = r#"```json\n{\"summary\":\"Solid.\",\"recommendation\":\"recommended\",\"overallScore\":88}\n```"#;
        let mock = server
            .mock("POST", "/v1beta/models/gemini-2.5-flash:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "generationConfig": { "maxOutputTokens": 2048 }
            })))
            .with_status(200)
            .with_body(format!(
                r#"{{"candidates":[{{"content":{{"role":"model","parts":[{{"text":"{}"}}]}}}}]}}"#,
                answer
            ))
            .create_async()
            .await;

        let verdict = provider_for(&server, Some("test-key"))
            .generate(&sample_result())
            .await
            .unwrap();

        assert_eq!(verdict.recommendation, Recommendation::Recommended);
        assert_eq!(verdict.overall_score, 88);
        assert_eq!(verdict.model.as_deref(), Some("Gemini 2.5 Flash"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_quota_exhausted_is_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1beta/models/gemini-2.5-flash:generateContent")
            .with_status(429)
            .with_body(r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#)
            .expect(1)
            .create_async()
            .await;

        let err = provider_for(&server, Some("test-key"))
            .generate(&sample_result())
            .await
            .unwrap_err();

        assert!(matches!(err, NarrativeError::RateLimited { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_key_is_unconfigured() {
        let server = mockito::Server::new_async().await;
        let err = provider_for(&server, None)
            .generate(&sample_result())
            .await
            .unwrap_err();

        assert!(matches!(err, NarrativeError::Unconfigured { .. }));
    }
}
