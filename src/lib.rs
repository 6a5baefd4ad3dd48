//! # npm_package_insight
//!
//! Analyzes a single npm package and reports on:
//! - **Registry metadata**: latest version, license, publish history, deprecation
//! - **Popularity**: monthly downloads, dependents and repository stars
//! - **Security**: GitHub advisories that apply to the latest version
//! - **Quality score**: a 0-100 heuristic over whichever signals were available
//! - **AI verdict**: an optional structured assessment from Gemini or Groq
//!
//! ## Quick Start
//!
//! ```no_run
//! use npm_package_insight::{AnalyzerConfig, PackageAnalyzer};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = AnalyzerConfig::default().with_env_credentials();
//! let analyzer = PackageAnalyzer::new(&config)?;
//! let result = analyzer.analyze("express").await?;
//!
//! println!("{} v{}: {}/100", result.package, result.registry.latest_version, result.quality_score);
//! for (source, failure) in &result.errors {
//!     println!("{} unavailable: {}", source, failure.message());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - Concurrent fetching of every optional source
//! - Partial results: a failing source never aborts the analysis
//! - Version-aware advisory filtering
//! - Ordered AI provider fallback on rate limits
//! - CLI tool with text, JSON and Markdown output

mod analyzer;
mod config;
mod error;
mod narrative;
mod resolver;
mod scoring;
mod sources;
mod types;
mod validation;
pub mod version;

// Re-export public API
pub use analyzer::{AnalyzerSources, PackageAnalyzer};
pub use config::{
    AnalyzerConfig, AnalyzerConfigBuilder, EndpointConfig, NarrativeConfig, NetworkConfig,
    ProviderConfig, ProviderKind,
};
pub use error::{AnalysisError, FetchError, FetchErrorKind, FetchResult, NarrativeError, Result};
pub use narrative::{group_thousands, GeminiProvider, GroqProvider, ProviderChain, VerdictProvider};
pub use resolver::{is_applicable, summarize};
pub use scoring::{calculate_quality_score, QualitySignals};
pub use sources::{
    AdvisorySource, DownloadSource, GitHubAdvisoryClient, GitHubClient, GitLabClient,
    NpmDownloadsClient, NpmRegistryClient, NpmSearchClient, RegistrySource, RepositoryClient,
    RepositoryLocator, RepositorySource, SearchSource,
};
pub use types::{
    AdvisoryRecord, AnalysisResult, DownloadStats, PopularitySignal, Rating, Recommendation,
    RegistryMetadata, RepositoryHost, RepositoryStats, SecuritySummary, Severity, SimilarPackage,
    Source, SourceFailure, Verdict,
};
pub use validation::{extract_package_name, validate_package_name, PackageIdentity};
pub use version::Version;
