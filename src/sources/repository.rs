//! Locate and fetch the source repository of a package

use super::{GitHubClient, GitLabClient, RepositorySource};
use crate::config::AnalyzerConfig;
use crate::error::FetchResult;
use crate::types::{RepositoryHost, RepositoryStats};
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;

/// A repository on a supported host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryLocator {
    pub host: RepositoryHost,
    /// Owner, or the full group path on GitLab
    pub owner: String,
    pub repo: String,
}

impl RepositoryLocator {
    pub fn new(host: RepositoryHost, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            host,
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Parse a repository URL as found in package manifests.
    ///
    /// Returns `None` for unsupported hosts and URLs without an owner and
    /// repository.
    pub fn parse(url: &str) -> Option<Self> {
        let url = url.trim();
        let url = url.strip_prefix("git+").unwrap_or(url);

        if let Some(path) = url.strip_prefix("github:") {
            return Self::from_path(RepositoryHost::GitHub, path);
        }
        if let Some(path) = url.strip_prefix("gitlab:") {
            return Self::from_path(RepositoryHost::GitLab, path);
        }

        let (authority, path) = match url.split_once("://") {
            Some((_, rest)) => rest.split_once('/')?,
            None => match url.split_once(':') {
                // scp-like `git@github.com:owner/repo.git`
                Some((authority, path)) if authority.contains('.') => (authority, path),
                // bare `owner/repo` means GitHub
                None if url.matches('/').count() == 1 => return Self::from_path(RepositoryHost::GitHub, url),
                _ => return None,
            },
        };

        let host = authority.rsplit('@').next()?;
        let host = host.split(':').next()?.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);

        match host {
            "github.com" => Self::from_path(RepositoryHost::GitHub, path),
            "gitlab.com" => Self::from_path(RepositoryHost::GitLab, path),
            _ => None,
        }
    }

    fn from_path(host: RepositoryHost, path: &str) -> Option<Self> {
        let path = path.split(['#', '?']).next()?;
        let path = match host {
            // `/-/` starts GitLab's UI routes
            RepositoryHost::GitLab => path.split("/-/").next()?,
            RepositoryHost::GitHub => path,
        };

        let segments: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let (owner, repo) = match host {
            RepositoryHost::GitHub => {
                if segments.len() < 2 {
                    return None;
                }
                (segments[0].to_string(), segments[1])
            }
            RepositoryHost::GitLab => {
                let (repo, groups) = segments.split_last()?;
                if groups.is_empty() {
                    return None;
                }
                (groups.join("/"), *repo)
            }
        };

        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        if repo.is_empty() {
            return None;
        }

        Some(Self::new(host, owner, repo))
    }

    /// `owner/repo`, or the full project path on GitLab
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RepositoryLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.host, self.full_name())
    }
}

/// Dispatches each locator to the client of its host
pub struct RepositoryClient {
    github: GitHubClient,
    gitlab: GitLabClient,
}

impl RepositoryClient {
    pub fn new(client: Client, config: &AnalyzerConfig) -> Self {
        Self {
            github: GitHubClient::new(client.clone(), config),
            gitlab: GitLabClient::new(client, config),
        }
    }
}

#[async_trait]
impl RepositorySource for RepositoryClient {
    async fn fetch_repository(&self, locator: &RepositoryLocator) -> FetchResult<Option<RepositoryStats>> {
        match locator.host {
            RepositoryHost::GitHub => self.github.fetch_repository(&locator.owner, &locator.repo).await,
            RepositoryHost::GitLab => self.gitlab.fetch_project(&locator.full_name()).await,
        }
    }
}
