//! Core data types for package analysis results

use crate::error::{FetchError, FetchErrorKind};
use crate::validation::PackageIdentity;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete analysis of a single npm package
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    /// Validated package name
    pub package: PackageIdentity,
    /// Timestamp when the analysis was performed
    pub analyzed_at: DateTime<Utc>,
    /// Registry metadata (always present)
    pub registry: RegistryMetadata,
    /// Downloads over the last 30 days
    pub downloads: Option<DownloadStats>,
    /// Search-index popularity signal
    pub popularity: Option<PopularitySignal>,
    /// Source repository statistics
    pub repository: Option<RepositoryStats>,
    /// Advisories that apply to the latest version
    pub security: SecuritySummary,
    /// Heuristic quality score (0-100)
    pub quality_score: u8,
    /// AI verdict, when one was requested and produced
    pub verdict: Option<Verdict>,
    /// Failures of optional sources, keyed by source
    pub errors: BTreeMap<Source, SourceFailure>,
}

impl AnalysisResult {
    /// Days between the latest publish and the analysis time
    pub fn days_since_last_publish(&self) -> Option<i64> {
        self.registry.days_since_latest_publish(self.analyzed_at)
    }

    pub fn npm_url(&self) -> String {
        format!("https://www.npmjs.com/package/{}", self.package.name())
    }
}

/// Named data sources of an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Registry,
    Downloads,
    Popularity,
    Repository,
    Advisories,
    Narrative,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry => write!(f, "registry"),
            Self::Downloads => write!(f, "downloads"),
            Self::Popularity => write!(f, "popularity"),
            Self::Repository => write!(f, "repository"),
            Self::Advisories => write!(f, "advisories"),
            Self::Narrative => write!(f, "narrative"),
        }
    }
}

/// Why an optional source contributed nothing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceFailure {
    /// The upstream could not be reached or answered badly
    Upstream {
        kind: FetchErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    /// The AI verdict could not be produced
    EnrichmentUnavailable { message: String },
}

impl SourceFailure {
    pub fn message(&self) -> &str {
        match self {
            Self::Upstream { message, .. } | Self::EnrichmentUnavailable { message } => message,
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Upstream { hint, .. } => hint.as_deref(),
            Self::EnrichmentUnavailable { .. } => None,
        }
    }
}

impl From<&FetchError> for SourceFailure {
    fn from(err: &FetchError) -> Self {
        Self::Upstream {
            kind: err.kind,
            message: err.to_string(),
            hint: err.remediation().map(String::from),
        }
    }
}

/// Registry snapshot of a package
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryMetadata {
    pub name: String,
    /// Version tagged `latest`, the one every other check is made against
    pub latest_version: String,
    pub description: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub repository_url: Option<String>,
    pub keywords: Vec<String>,
    pub maintainers: Vec<String>,
    /// Publish time of every version
    pub publish_times: BTreeMap<String, DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
    pub version_count: usize,
    /// Deprecation notice of the latest version
    pub deprecated: Option<String>,
    /// README excerpt
    pub readme: Option<String>,
}

impl RegistryMetadata {
    pub fn latest_publish_time(&self) -> Option<DateTime<Utc>> {
        self.publish_times.get(&self.latest_version).copied()
    }

    pub fn days_since_latest_publish(&self, now: DateTime<Utc>) -> Option<i64> {
        self.latest_publish_time()
            .map(|published| now.signed_duration_since(published).num_days())
    }
}

/// Download count over the trailing month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadStats {
    pub downloads: u64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub package: String,
}

/// Popularity signal from the package search index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularitySignal {
    pub dependents: Option<u64>,
    /// Sub-scores on a 0-1 scale
    pub quality: f64,
    pub popularity: f64,
    pub maintenance: f64,
    pub final_score: Option<f64>,
}

/// Hosting service of a source repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryHost {
    GitHub,
    GitLab,
}

impl std::fmt::Display for RepositoryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GitHub => write!(f, "GitHub"),
            Self::GitLab => write!(f, "GitLab"),
        }
    }
}

/// Repository statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryStats {
    pub host: RepositoryHost,
    pub full_name: String,
    pub stars: u64,
    pub forks: u64,
    pub open_issues: u64,
    pub pushed_at: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub archived: bool,
}

/// Advisory severity bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    /// Parse an upstream label such as `MODERATE` or `medium`
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "moderate" | "medium" => Some(Self::Moderate),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A published advisory, as delivered by the advisory feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvisoryRecord {
    pub id: String,
    pub summary: String,
    pub description: String,
    pub severity: Severity,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub vulnerable_version_range: Option<String>,
    pub first_patched_version: Option<String>,
}

impl AdvisoryRecord {
    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn_at.is_some()
    }
}

/// Advisories that apply to a version, counted per severity.
///
/// Counters only move through [`SecuritySummary::record`], so
/// `total_count` always equals the bucket sum and the list length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SecuritySummary {
    has_vulnerabilities: bool,
    total_count: usize,
    critical: usize,
    high: usize,
    moderate: usize,
    low: usize,
    vulnerabilities: Vec<AdvisoryRecord>,
}

impl SecuritySummary {
    pub fn record(&mut self, advisory: AdvisoryRecord) {
        match advisory.severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Moderate => self.moderate += 1,
            Severity::Low => self.low += 1,
        }
        self.total_count += 1;
        self.has_vulnerabilities = true;
        self.vulnerabilities.push(advisory);
    }

    pub fn has_vulnerabilities(&self) -> bool {
        self.has_vulnerabilities
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn critical(&self) -> usize {
        self.critical
    }

    pub fn high(&self) -> usize {
        self.high
    }

    pub fn moderate(&self) -> usize {
        self.moderate
    }

    pub fn low(&self) -> usize {
        self.low
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Moderate => self.moderate,
            Severity::Low => self.low,
        }
    }

    pub fn vulnerabilities(&self) -> &[AdvisoryRecord] {
        &self.vulnerabilities
    }
}

/// Overall recommendation of a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    Recommended,
    UseWithCaution,
    NotRecommended,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recommended => write!(f, "Recommended"),
            Self::UseWithCaution => write!(f, "Use with caution"),
            Self::NotRecommended => write!(f, "Not recommended"),
        }
    }
}

/// Four-level categorical rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Excellent => write!(f, "Excellent"),
            Self::Good => write!(f, "Good"),
            Self::Fair => write!(f, "Fair"),
            Self::Poor => write!(f, "Poor"),
        }
    }
}

/// Structured AI assessment of a package
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub summary: String,
    pub recommendation: Recommendation,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    /// 0-100
    pub overall_score: u8,
    pub security_rating: Rating,
    pub quality_rating: Rating,
    pub maintenance_rating: Rating,
    pub reasoning: String,
    /// Label of the provider that produced the verdict
    pub model: Option<String>,
}

/// A package related to the one analysed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarPackage {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    /// Search-index score (0-1)
    pub score: Option<f64>,
}
