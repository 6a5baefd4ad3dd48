//! Fetch project statistics from GitLab

use super::http::{check_status, decode_json, send_with_retry, Forbidden};
use crate::config::AnalyzerConfig;
use crate::error::FetchResult;
use crate::types::{RepositoryHost, RepositoryStats};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "GitLab";

/// Client for the GitLab projects API
pub struct GitLabClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
    request_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    path_with_namespace: String,
    #[serde(default)]
    star_count: u64,
    #[serde(default)]
    forks_count: u64,
    // Absent when issues are disabled
    #[serde(default)]
    open_issues_count: u64,
    last_activity_at: Option<String>,
    #[serde(default)]
    archived: bool,
}

impl GitLabClient {
    pub fn new(client: Client, config: &AnalyzerConfig) -> Self {
        Self {
            client,
            base_url: config.endpoints.gitlab_api_url.trim_end_matches('/').to_string(),
            token: config.network.gitlab_token.clone(),
            max_retries: config.network.max_retries,
            request_delay: config.network.request_delay(),
        }
    }

    /// Fetch a project by its full path; `None` when GitLab does not know it
    pub async fn fetch_project(&self, project_path: &str) -> FetchResult<Option<RepositoryStats>> {
        debug!("Fetching GitLab metadata for {}", project_path);

        let url = format!("{}/projects/{}", self.base_url, urlencoding::encode(project_path));
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header("PRIVATE-TOKEN", token);
        }

        let response = send_with_retry(SERVICE, request, self.max_retries, self.request_delay).await?;
        let response = match check_status(SERVICE, response, Forbidden::CheckHeaders) {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                debug!("GitLab project {} not found", project_path);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let project: GitLabProject = decode_json(SERVICE, response).await?;

        Ok(Some(RepositoryStats {
            host: RepositoryHost::GitLab,
            full_name: project.path_with_namespace,
            stars: project.star_count,
            forks: project.forks_count,
            open_issues: project.open_issues_count,
            pushed_at: project.last_activity_at.as_deref().and_then(parse_gitlab_datetime),
            // Not part of the project resource
            language: None,
            archived: project.archived,
        }))
    }
}

fn parse_gitlab_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
