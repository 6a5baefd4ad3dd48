//! Fetch repository statistics from GitHub

use super::http::{check_status, decode_json, send_with_retry, Forbidden};
use crate::config::AnalyzerConfig;
use crate::error::FetchResult;
use crate::types::{RepositoryHost, RepositoryStats};
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "GitHub";

/// Client for the GitHub REST API
pub struct GitHubClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
    request_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    full_name: String,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    open_issues_count: u64,
    pushed_at: Option<String>,
    language: Option<String>,
    #[serde(default)]
    archived: bool,
}

impl GitHubClient {
    pub fn new(client: Client, config: &AnalyzerConfig) -> Self {
        Self {
            client,
            base_url: config.endpoints.github_api_url.trim_end_matches('/').to_string(),
            token: config.network.github_token.clone(),
            max_retries: config.network.max_retries,
            request_delay: config.network.request_delay(),
        }
    }

    /// Fetch a repository; `None` when GitHub does not know it
    pub async fn fetch_repository(&self, owner: &str, repo: &str) -> FetchResult<Option<RepositoryStats>> {
        debug!("Fetching GitHub metadata for {}/{}", owner, repo);

        let url = format!("{}/repos/{}/{}", self.base_url, owner, repo);
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = send_with_retry(SERVICE, request, self.max_retries, self.request_delay).await?;
        let response = match check_status(SERVICE, response, Forbidden::MeansRateLimited) {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                debug!("GitHub repository {}/{} not found", owner, repo);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let data: GitHubRepo = decode_json(SERVICE, response).await?;

        Ok(Some(RepositoryStats {
            host: RepositoryHost::GitHub,
            full_name: data.full_name,
            stars: data.stargazers_count,
            forks: data.forks_count,
            open_issues: data.open_issues_count,
            pushed_at: data.pushed_at.as_deref().and_then(parse_github_datetime),
            language: data.language,
            archived: data.archived,
        }))
    }
}

fn parse_github_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
