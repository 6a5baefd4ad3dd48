//! AI verdicts on a finished analysis
//!
//! A [`VerdictProvider`] turns an [`AnalysisResult`] into a [`Verdict`].
//! [`ProviderChain`] tries several providers in order, moving on only when
//! a provider is rate limited or has no API key.

mod gemini;
mod groq;
mod prompt;

pub use gemini::GeminiProvider;
pub use groq::GroqProvider;
pub use prompt::group_thousands;

use crate::config::{AnalyzerConfig, ProviderKind};
use crate::error::NarrativeError;
use crate::types::{AnalysisResult, Verdict};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};

/// Produces a verdict for an analysis
#[async_trait]
pub trait VerdictProvider: Send + Sync {
    /// Label recorded on verdicts and in logs
    fn name(&self) -> &str;

    async fn generate(&self, result: &AnalysisResult) -> Result<Verdict, NarrativeError>;
}

/// Ordered fallback over several providers
pub struct ProviderChain {
    providers: Vec<Box<dyn VerdictProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn VerdictProvider>>) -> Self {
        Self { providers }
    }

    /// Build the configured providers, in configuration order
    pub fn from_config(client: Client, config: &AnalyzerConfig) -> Self {
        let endpoints = &config.endpoints;
        let providers = config
            .narrative
            .providers
            .iter()
            .map(|provider| -> Box<dyn VerdictProvider> {
                match provider.kind {
                    ProviderKind::Gemini => Box::new(GeminiProvider::new(
                        client.clone(),
                        &endpoints.gemini_api_url,
                        provider,
                    )),
                    ProviderKind::Groq => Box::new(GroqProvider::new(
                        client.clone(),
                        &endpoints.groq_api_url,
                        provider,
                    )),
                }
            })
            .collect();

        Self::new(providers)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl VerdictProvider for ProviderChain {
    fn name(&self) -> &str {
        "provider chain"
    }

    async fn generate(&self, result: &AnalysisResult) -> Result<Verdict, NarrativeError> {
        let mut last_error = NarrativeError::NoProviders;

        for provider in &self.providers {
            match provider.generate(result).await {
                Ok(verdict) => {
                    info!("Verdict for {} produced by {}", result.package, provider.name());
                    return Ok(verdict);
                }
                Err(e) if e.allows_fallback() => {
                    warn!("{}, trying next provider", e);
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{Rating, Recommendation, RegistryMetadata, SecuritySummary};
    use crate::validation::PackageIdentity;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub(crate) fn sample_result() -> AnalysisResult {
        AnalysisResult {
            package: PackageIdentity::parse("express").unwrap(),
            analyzed_at: Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap(),
            registry: RegistryMetadata {
                name: "express".to_string(),
                latest_version: "5.1.0".to_string(),
                ..Default::default()
            },
            downloads: None,
            popularity: None,
            repository: None,
            security: SecuritySummary::default(),
            quality_score: 75,
            verdict: None,
            errors: BTreeMap::new(),
        }
    }

    enum Outcome {
        Verdict,
        RateLimited,
        Unconfigured,
        Failed,
    }

    struct FakeProvider {
        label: &'static str,
        outcome: Outcome,
        calls: Arc<AtomicUsize>,
    }

    impl FakeProvider {
        fn boxed(label: &'static str, outcome: Outcome, calls: &Arc<AtomicUsize>) -> Box<dyn VerdictProvider> {
            Box::new(Self {
                label,
                outcome,
                calls: Arc::clone(calls),
            })
        }
    }

    #[async_trait]
    impl VerdictProvider for FakeProvider {
        fn name(&self) -> &str {
            self.label
        }

        async fn generate(&self, _result: &AnalysisResult) -> Result<Verdict, NarrativeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let provider = self.label.to_string();
            match self.outcome {
                Outcome::Verdict => Ok(Verdict {
                    summary: "ok".to_string(),
                    recommendation: Recommendation::Recommended,
                    strengths: vec![],
                    concerns: vec![],
                    overall_score: 90,
                    security_rating: Rating::Good,
                    quality_rating: Rating::Good,
                    maintenance_rating: Rating::Good,
                    reasoning: "ok".to_string(),
                    model: Some(provider),
                }),
                Outcome::RateLimited => Err(NarrativeError::RateLimited { provider }),
                Outcome::Unconfigured => Err(NarrativeError::Unconfigured { provider }),
                Outcome::Failed => Err(NarrativeError::Provider {
                    provider,
                    message: "boom".to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_chain_falls_back_on_rate_limit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ProviderChain::new(vec![
            FakeProvider::boxed("first", Outcome::RateLimited, &calls),
            FakeProvider::boxed("second", Outcome::Unconfigured, &calls),
            FakeProvider::boxed("third", Outcome::Verdict, &calls),
        ]);

        let verdict = chain.generate(&sample_result()).await.unwrap();
        assert_eq!(verdict.model.as_deref(), Some("third"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_chain_stops_on_other_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ProviderChain::new(vec![
            FakeProvider::boxed("first", Outcome::Failed, &calls),
            FakeProvider::boxed("second", Outcome::Verdict, &calls),
        ]);

        let err = chain.generate(&sample_result()).await.unwrap_err();
        assert!(matches!(err, NarrativeError::Provider { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chain_exhausted_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ProviderChain::new(vec![
            FakeProvider::boxed("first", Outcome::RateLimited, &calls),
            FakeProvider::boxed("second", Outcome::RateLimited, &calls),
        ]);

        let err = chain.generate(&sample_result()).await.unwrap_err();
        assert!(matches!(err, NarrativeError::RateLimited { ref provider } if provider == "second"));
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let chain = ProviderChain::new(vec![]);
        assert!(chain.is_empty());
        let err = chain.generate(&sample_result()).await.unwrap_err();
        assert!(matches!(err, NarrativeError::NoProviders));
    }

    #[test]
    fn test_default_chain_order() {
        let chain = ProviderChain::from_config(Client::new(), &AnalyzerConfig::default());
        let names: Vec<&str> = chain.providers.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec!["Gemini 2.5 Flash", "Gemini 2.5 Flash Lite", "Llama 3.3 70B (Groq)"]
        );
    }
}
