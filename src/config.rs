//! Configuration for upstream endpoints, credentials and the AI verdict chain

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for the analyzer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Network configuration
    pub network: NetworkConfig,
    /// Base URLs of every upstream source
    pub endpoints: EndpointConfig,
    /// AI verdict providers
    pub narrative: NarrativeConfig,
}

/// Network configuration for API calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum number of retries for failed requests
    pub max_retries: u32,
    /// Base delay between retries (milliseconds), doubled on each attempt
    pub request_delay_ms: u64,
    /// GitHub API token (repository stats and the advisory database)
    pub github_token: Option<String>,
    /// GitLab API token (optional)
    pub gitlab_token: Option<String>,
}

/// Base URLs of the upstream services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub registry_url: String,
    pub downloads_url: String,
    pub github_api_url: String,
    pub github_graphql_url: String,
    pub gitlab_api_url: String,
    pub gemini_api_url: String,
    pub groq_api_url: String,
}

/// Ordered chain of AI verdict providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    /// Whether to request a verdict at all
    pub enabled: bool,
    /// Providers, tried in order
    pub providers: Vec<ProviderConfig>,
}

/// Backend family of a verdict provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
}

/// A single verdict provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Model identifier sent to the backend
    pub model: String,
    /// Human-readable label stored on the verdict
    pub label: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            request_delay_ms: 250,
            github_token: None,
            gitlab_token: None,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            registry_url: "https://registry.npmjs.org".to_string(),
            downloads_url: "https://api.npmjs.org/downloads".to_string(),
            github_api_url: "https://api.github.com".to_string(),
            github_graphql_url: "https://api.github.com/graphql".to_string(),
            gitlab_api_url: "https://gitlab.com/api/v4".to_string(),
            gemini_api_url: "https://generativelanguage.googleapis.com".to_string(),
            groq_api_url: "https://api.groq.com/openai/v1".to_string(),
        }
    }
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            providers: vec![
                ProviderConfig::new(ProviderKind::Gemini, "gemini-2.5-flash", "Gemini 2.5 Flash"),
                ProviderConfig::new(
                    ProviderKind::Gemini,
                    "gemini-2.5-flash-lite",
                    "Gemini 2.5 Flash Lite",
                ),
                ProviderConfig::new(
                    ProviderKind::Groq,
                    "llama-3.3-70b-versatile",
                    "Llama 3.3 70B (Groq)",
                ),
            ],
        }
    }
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            label: label.into(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl NetworkConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get request delay as Duration
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl AnalyzerConfig {
    /// Create a new builder for AnalyzerConfig
    pub fn builder() -> AnalyzerConfigBuilder {
        AnalyzerConfigBuilder::default()
    }

    /// Fill unset credentials from GITHUB_TOKEN, GITLAB_TOKEN, GOOGLE_API_KEY and GROQ_API_KEY
    pub fn with_env_credentials(mut self) -> Self {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        if self.network.github_token.is_none() {
            self.network.github_token = env("GITHUB_TOKEN");
        }
        if self.network.gitlab_token.is_none() {
            self.network.gitlab_token = env("GITLAB_TOKEN");
        }
        for provider in &mut self.narrative.providers {
            if provider.api_key.is_some() {
                continue;
            }
            provider.api_key = match provider.kind {
                ProviderKind::Gemini => env("GOOGLE_API_KEY"),
                ProviderKind::Groq => env("GROQ_API_KEY"),
            };
        }
        self
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.network.timeout_secs == 0 {
            return Err(AnalysisError::config("timeout_secs must be greater than zero"));
        }

        let endpoints = [
            ("registry_url", &self.endpoints.registry_url),
            ("downloads_url", &self.endpoints.downloads_url),
            ("github_api_url", &self.endpoints.github_api_url),
            ("github_graphql_url", &self.endpoints.github_graphql_url),
            ("gitlab_api_url", &self.endpoints.gitlab_api_url),
            ("gemini_api_url", &self.endpoints.gemini_api_url),
            ("groq_api_url", &self.endpoints.groq_api_url),
        ];
        for (name, url) in endpoints {
            if url.trim().is_empty() {
                return Err(AnalysisError::config(format!("endpoint {} is empty", name)));
            }
        }

        if self.narrative.enabled && self.narrative.providers.is_empty() {
            return Err(AnalysisError::config(
                "narrative is enabled but no providers are configured",
            ));
        }

        Ok(())
    }
}

/// Builder for AnalyzerConfig
#[derive(Default)]
pub struct AnalyzerConfigBuilder {
    network: Option<NetworkConfig>,
    endpoints: Option<EndpointConfig>,
    narrative: Option<NarrativeConfig>,
}

impl AnalyzerConfigBuilder {
    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    pub fn endpoints(mut self, endpoints: EndpointConfig) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn narrative(mut self, narrative: NarrativeConfig) -> Self {
        self.narrative = Some(narrative);
        self
    }

    pub fn build(self) -> AnalyzerConfig {
        AnalyzerConfig {
            network: self.network.unwrap_or_default(),
            endpoints: self.endpoints.unwrap_or_default(),
            narrative: self.narrative.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid_and_credential_free() {
        let config = AnalyzerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.network.github_token.is_none());
        assert!(config.narrative.providers.iter().all(|p| p.api_key.is_none()));
        assert_eq!(config.narrative.providers.len(), 3);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = AnalyzerConfig::builder()
            .network(NetworkConfig {
                timeout_secs: 0,
                ..NetworkConfig::default()
            })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_enabled_empty_chain() {
        let config = AnalyzerConfig::builder()
            .narrative(NarrativeConfig {
                enabled: true,
                providers: vec![],
            })
            .build();
        assert!(matches!(config.validate(), Err(AnalysisError::ConfigError(_))));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AnalyzerConfig = toml::from_str(
            r#"
            [network]
            timeout_secs = 5

            [endpoints]
            registry_url = "http://localhost:4873"
            "#,
        )
        .unwrap();

        assert_eq!(config.network.timeout_secs, 5);
        assert_eq!(config.network.max_retries, 2);
        assert_eq!(config.endpoints.registry_url, "http://localhost:4873");
        assert_eq!(config.endpoints.downloads_url, "https://api.npmjs.org/downloads");
    }

    #[test]
    fn test_provider_toml_defaults() {
        let config: AnalyzerConfig = toml::from_str(
            r#"
            [narrative]
            enabled = true

            [[narrative.providers]]
            kind = "groq"
            model = "llama-3.3-70b-versatile"
            label = "Groq"
            "#,
        )
        .unwrap();

        let provider = &config.narrative.providers[0];
        assert_eq!(provider.kind, ProviderKind::Groq);
        assert_eq!(provider.max_tokens, 2048);
        assert!(provider.api_key.is_none());
    }
}
