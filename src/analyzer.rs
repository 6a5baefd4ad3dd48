//! Main analysis orchestration logic

use crate::config::AnalyzerConfig;
use crate::error::{AnalysisError, FetchError, FetchResult, Result};
use crate::narrative::{ProviderChain, VerdictProvider};
use crate::resolver;
use crate::scoring::{calculate_quality_score, QualitySignals};
use crate::sources::http::build_client;
use crate::sources::{
    AdvisorySource, DownloadSource, GitHubAdvisoryClient, NpmDownloadsClient, NpmRegistryClient,
    NpmSearchClient, RegistrySource, RepositoryClient, RepositoryLocator, RepositorySource,
    SearchSource,
};
use crate::types::{
    AnalysisResult, RegistryMetadata, SecuritySummary, SimilarPackage, Source, SourceFailure,
};
use crate::validation::PackageIdentity;
use crate::version::Version;
use chrono::Utc;
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The upstream sources an analyzer fans out over
#[derive(Clone)]
pub struct AnalyzerSources {
    pub registry: Arc<dyn RegistrySource>,
    pub downloads: Arc<dyn DownloadSource>,
    pub search: Arc<dyn SearchSource>,
    pub repository: Arc<dyn RepositorySource>,
    pub advisories: Arc<dyn AdvisorySource>,
}

impl AnalyzerSources {
    /// HTTP adapters sharing one client
    pub fn http(client: Client, config: &AnalyzerConfig) -> Self {
        Self {
            registry: Arc::new(NpmRegistryClient::new(client.clone(), config)),
            downloads: Arc::new(NpmDownloadsClient::new(client.clone(), config)),
            search: Arc::new(NpmSearchClient::new(client.clone(), config)),
            repository: Arc::new(RepositoryClient::new(client.clone(), config)),
            advisories: Arc::new(GitHubAdvisoryClient::new(client, config)),
        }
    }
}

/// Aggregates registry, popularity, repository and advisory data into a
/// single [`AnalysisResult`].
///
/// Only the registry is mandatory. Every other source may fail on its own;
/// the failure is recorded in [`AnalysisResult::errors`] and the analysis
/// carries on.
pub struct PackageAnalyzer {
    sources: AnalyzerSources,
    narrator: Option<Arc<dyn VerdictProvider>>,
}

impl PackageAnalyzer {
    /// Build an analyzer backed by the real upstream services
    pub fn new(config: &AnalyzerConfig) -> Result<Self> {
        config.validate()?;

        let client = build_client(&config.network)?;
        let mut analyzer = Self::from_sources(AnalyzerSources::http(client.clone(), config));

        if config.narrative.enabled {
            let chain = ProviderChain::from_config(client, config);
            debug!("Verdicts enabled with {} provider(s)", chain.len());
            analyzer = analyzer.with_narrator(Arc::new(chain));
        }

        Ok(analyzer)
    }

    pub fn from_sources(sources: AnalyzerSources) -> Self {
        Self {
            sources,
            narrator: None,
        }
    }

    /// Request a verdict at the end of every analysis
    pub fn with_narrator(mut self, narrator: Arc<dyn VerdictProvider>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    /// Analyze a package.
    ///
    /// Fails only on an invalid name or when the registry cannot serve
    /// the package.
    pub async fn analyze(&self, raw: &str) -> Result<AnalysisResult> {
        let package = PackageIdentity::parse(raw)?;
        info!("Starting analysis of {}", package);

        let analyzed_at = Utc::now();
        let registry = self.fetch_registry(&package).await?;

        let locator = registry
            .repository_url
            .as_deref()
            .and_then(RepositoryLocator::parse);
        if locator.is_none() {
            debug!(
                "No supported repository for {} ({:?})",
                package, registry.repository_url
            );
        }

        let repository = async {
            match &locator {
                Some(locator) => self.sources.repository.fetch_repository(locator).await,
                None => Ok(None),
            }
        };

        let (downloads, popularity, repository, advisories) = tokio::join!(
            self.sources.downloads.fetch_downloads(&package),
            self.sources.search.fetch_popularity(&package),
            repository,
            self.sources.advisories.fetch_advisories(&package),
        );

        let mut errors = BTreeMap::new();
        let downloads = absorb(&package, Source::Downloads, downloads, &mut errors);
        let popularity = absorb(&package, Source::Popularity, popularity, &mut errors).flatten();
        let repository = absorb(&package, Source::Repository, repository, &mut errors).flatten();
        let security = absorb(&package, Source::Advisories, advisories, &mut errors)
            .map(|advisories| resolver::summarize(advisories, Some(&registry.latest_version)));

        let signals = QualitySignals::from_parts(
            &registry,
            downloads.as_ref(),
            popularity.as_ref(),
            repository.as_ref(),
            security.as_ref(),
            analyzed_at,
        );
        let quality_score = calculate_quality_score(&signals);

        let mut result = AnalysisResult {
            package,
            analyzed_at,
            registry,
            downloads,
            popularity,
            repository,
            security: security.unwrap_or_default(),
            quality_score,
            verdict: None,
            errors,
        };

        if let Some(narrator) = &self.narrator {
            match narrator.generate(&result).await {
                Ok(verdict) => result.verdict = Some(verdict),
                Err(e) => {
                    warn!("Verdict unavailable for {}: {}", result.package, e);
                    result.errors.insert(
                        Source::Narrative,
                        SourceFailure::EnrichmentUnavailable {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        info!(
            "Analysis of {} complete: score {}/100, {} applicable advisories, {} source error(s)",
            result.package,
            result.quality_score,
            result.security.total_count(),
            result.errors.len()
        );

        Ok(result)
    }

    /// Advisories that apply to an explicit version of a package
    pub async fn check_security(&self, raw: &str, version: &str) -> Result<SecuritySummary> {
        let package = PackageIdentity::parse(raw)?;
        let version = version.trim();

        if version.is_empty() {
            return Err(AnalysisError::invalid("Version is required"));
        }
        if Version::parse(version).is_none() {
            return Err(AnalysisError::invalid(format!("Invalid version \"{}\"", version)));
        }

        info!("Checking advisories for {}@{}", package, version);
        let advisories = self.sources.advisories.fetch_advisories(&package).await?;

        Ok(resolver::summarize(advisories, Some(version)))
    }

    /// Packages related to `raw`, found through its registry keywords
    pub async fn similar_packages(&self, raw: &str, limit: usize) -> Result<Vec<SimilarPackage>> {
        self.similar_packages_for_keywords(raw, &[], limit).await
    }

    /// Like [`similar_packages`](Self::similar_packages), searching for the
    /// given keywords instead of the registry ones when any are supplied
    pub async fn similar_packages_for_keywords(
        &self,
        raw: &str,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<SimilarPackage>> {
        let package = PackageIdentity::parse(raw)?;

        let keywords = if keywords.iter().any(|k| !k.trim().is_empty()) {
            keywords.to_vec()
        } else {
            self.fetch_registry(&package).await?.keywords
        };

        let similar = self
            .sources
            .search
            .find_similar(&keywords, &package, limit)
            .await?;

        debug!("Found {} packages similar to {}", similar.len(), package);
        Ok(similar)
    }

    async fn fetch_registry(&self, package: &PackageIdentity) -> Result<RegistryMetadata> {
        self.sources
            .registry
            .fetch_metadata(package)
            .await
            .map_err(|e| registry_failure(package, e))
    }
}

fn registry_failure(package: &PackageIdentity, err: FetchError) -> AnalysisError {
    if err.is_not_found() {
        AnalysisError::NotFound(package.name().to_string())
    } else {
        warn!("Registry lookup for {} failed: {}", package, err);
        AnalysisError::Upstream(err)
    }
}

/// Keep the value of a successful optional fetch, or record why it failed
fn absorb<T>(
    package: &PackageIdentity,
    source: Source,
    outcome: FetchResult<T>,
    errors: &mut BTreeMap<Source, SourceFailure>,
) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to fetch {} for {}: {}", source, package, e);
            errors.insert(source, SourceFailure::from(&e));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;

    #[test]
    fn test_absorb_records_failure() {
        let package = PackageIdentity::parse("left-pad").unwrap();
        let mut errors = BTreeMap::new();

        let kept = absorb(&package, Source::Downloads, Ok(3u64), &mut errors);
        assert_eq!(kept, Some(3));
        assert!(errors.is_empty());

        let lost: Option<u64> = absorb(
            &package,
            Source::Repository,
            Err(FetchError::rate_limited("GitHub", None)),
            &mut errors,
        );
        assert!(lost.is_none());
        assert!(matches!(
            errors.get(&Source::Repository),
            Some(SourceFailure::Upstream { kind: FetchErrorKind::RateLimited, .. })
        ));
    }

    #[test]
    fn test_registry_failure_mapping() {
        let package = PackageIdentity::parse("left-pad").unwrap();

        let missing = registry_failure(&package, FetchError::not_found("npm registry", "HTTP 404"));
        assert!(matches!(missing, AnalysisError::NotFound(ref name) if name == "left-pad"));

        let down = registry_failure(&package, FetchError::network("npm registry", "HTTP 503"));
        assert!(matches!(down, AnalysisError::Upstream(_)));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = AnalyzerConfig::default();
        config.network.timeout_secs = 0;
        assert!(matches!(
            PackageAnalyzer::new(&config),
            Err(AnalysisError::ConfigError(_))
        ));
    }
}
