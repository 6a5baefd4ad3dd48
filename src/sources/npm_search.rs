//! Query the npm registry search index

use super::http::{check_status, decode_json, send_with_retry, Forbidden};
use super::SearchSource;
use crate::config::AnalyzerConfig;
use crate::error::FetchResult;
use crate::types::{PopularitySignal, SimilarPackage};
use crate::validation::PackageIdentity;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "npm search";
const MAX_KEYWORDS: usize = 5;
/// Largest `size` the search endpoint accepts
const MAX_PAGE_SIZE: usize = 250;

/// Client for `GET /-/v1/search`
pub struct NpmSearchClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    request_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    objects: Vec<SearchObject>,
}

#[derive(Debug, Deserialize)]
struct SearchObject {
    package: SearchPackage,
    score: Option<SearchScore>,
    dependents: Option<Count>,
}

#[derive(Debug, Deserialize)]
struct SearchPackage {
    name: String,
    #[serde(default)]
    version: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchScore {
    #[serde(rename = "final")]
    final_score: Option<f64>,
    #[serde(default)]
    detail: ScoreDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ScoreDetail {
    #[serde(default)]
    quality: f64,
    #[serde(default)]
    popularity: f64,
    #[serde(default)]
    maintenance: f64,
}

/// The index reports dependents as a number or a numeric string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Count {
    Number(u64),
    Text(String),
}

impl Count {
    fn value(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().replace(',', "").parse().ok(),
        }
    }
}

impl NpmSearchClient {
    pub fn new(client: Client, config: &AnalyzerConfig) -> Self {
        Self {
            client,
            base_url: config.endpoints.registry_url.trim_end_matches('/').to_string(),
            max_retries: config.network.max_retries,
            request_delay: config.network.request_delay(),
        }
    }

    async fn search(&self, text: &str, size: usize) -> FetchResult<SearchResponse> {
        let url = format!("{}/-/v1/search", self.base_url);
        let size = size.to_string();
        let request = self
            .client
            .get(&url)
            .query(&[("text", text), ("size", size.as_str())]);

        let response = send_with_retry(SERVICE, request, self.max_retries, self.request_delay).await?;
        let response = check_status(SERVICE, response, Forbidden::CheckHeaders)?;

        decode_json(SERVICE, response).await
    }
}

#[async_trait]
impl SearchSource for NpmSearchClient {
    async fn fetch_popularity(&self, package: &PackageIdentity) -> FetchResult<Option<PopularitySignal>> {
        debug!("Fetching search popularity for {}", package);

        let results = self.search(package.name(), 1).await?;

        let signal = results
            .objects
            .into_iter()
            .next()
            .filter(|object| object.package.name == package.name())
            .map(|object| {
                let score = object.score.unwrap_or(SearchScore {
                    final_score: None,
                    detail: ScoreDetail::default(),
                });
                PopularitySignal {
                    dependents: object.dependents.as_ref().and_then(Count::value),
                    quality: score.detail.quality,
                    popularity: score.detail.popularity,
                    maintenance: score.detail.maintenance,
                    final_score: score.final_score,
                }
            });

        if signal.is_none() {
            debug!("No exact search match for {}", package);
        }
        Ok(signal)
    }

    async fn find_similar(
        &self,
        keywords: &[String],
        exclude: &PackageIdentity,
        limit: usize,
    ) -> FetchResult<Vec<SimilarPackage>> {
        let keywords: Vec<&str> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .take(MAX_KEYWORDS)
            .collect();

        let query = if keywords.is_empty() {
            exclude.name().to_string()
        } else {
            format!("keywords:{}", keywords.join(","))
        };
        debug!("Searching packages similar to {} with \"{}\"", exclude, query);

        // One extra slot for the package itself
        let size = limit.saturating_add(1).min(MAX_PAGE_SIZE);
        let results = self.search(&query, size).await?;

        Ok(results
            .objects
            .into_iter()
            .filter(|object| object.package.name != exclude.name())
            .take(limit)
            .map(|object| SimilarPackage {
                name: object.package.name,
                version: object.package.version,
                description: object.package.description,
                score: object.score.and_then(|s| s.final_score),
            })
            .collect())
    }
}
