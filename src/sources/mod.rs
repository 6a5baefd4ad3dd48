//! Upstream data sources
//!
//! Each adapter wraps one HTTP service and returns typed, request-scoped
//! data. The traits are the seams the analyzer fans out over; tests swap in
//! fakes.

mod advisories;
mod github;
mod gitlab;
pub(crate) mod http;
mod npm_downloads;
mod npm_registry;
mod npm_search;
mod repository;

pub use advisories::GitHubAdvisoryClient;
pub use github::GitHubClient;
pub use gitlab::GitLabClient;
pub use npm_downloads::NpmDownloadsClient;
pub use npm_registry::NpmRegistryClient;
pub use npm_search::NpmSearchClient;
pub use repository::{RepositoryClient, RepositoryLocator};

use crate::error::FetchResult;
use crate::types::{
    AdvisoryRecord, DownloadStats, PopularitySignal, RegistryMetadata, RepositoryStats,
    SimilarPackage,
};
use crate::validation::PackageIdentity;
use async_trait::async_trait;

/// Registry metadata; the one mandatory source
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn fetch_metadata(&self, package: &PackageIdentity) -> FetchResult<RegistryMetadata>;
}

/// Monthly download counts
#[async_trait]
pub trait DownloadSource: Send + Sync {
    async fn fetch_downloads(&self, package: &PackageIdentity) -> FetchResult<DownloadStats>;
}

/// Package search index
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Popularity of the exact package; `None` when the index has no exact match
    async fn fetch_popularity(&self, package: &PackageIdentity) -> FetchResult<Option<PopularitySignal>>;

    /// Packages sharing the given keywords, excluding `exclude`
    async fn find_similar(
        &self,
        keywords: &[String],
        exclude: &PackageIdentity,
        limit: usize,
    ) -> FetchResult<Vec<SimilarPackage>>;
}

/// Source repository statistics
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// `None` when the repository does not exist upstream
    async fn fetch_repository(&self, locator: &RepositoryLocator) -> FetchResult<Option<RepositoryStats>>;
}

/// Security advisory feed
#[async_trait]
pub trait AdvisorySource: Send + Sync {
    async fn fetch_advisories(&self, package: &PackageIdentity) -> FetchResult<Vec<AdvisoryRecord>>;
}
