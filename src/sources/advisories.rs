//! Fetch security advisories from the GitHub Advisory Database

use super::http::{check_status, decode_json, send_with_retry, Forbidden};
use super::AdvisorySource;
use crate::config::AnalyzerConfig;
use crate::error::{FetchError, FetchResult};
use crate::types::{AdvisoryRecord, Severity};
use crate::validation::PackageIdentity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "GitHub advisories";

const ADVISORY_QUERY: &str = r#"
query($packageName: String!) {
  securityVulnerabilities(first: 100, ecosystem: NPM, package: $packageName) {
    nodes {
      advisory {
        ghsaId
        summary
        description
        severity
        publishedAt
        updatedAt
        withdrawnAt
        references {
          url
        }
      }
      vulnerableVersionRange
      firstPatchedVersion {
        identifier
      }
    }
  }
}
"#;

/// Client for `securityVulnerabilities` over the GitHub GraphQL API
pub struct GitHubAdvisoryClient {
    client: Client,
    graphql_url: String,
    token: Option<String>,
    max_retries: u32,
    request_delay: Duration,
}

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'static str,
    variables: Variables<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Variables<'a> {
    package_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<ResponseData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseData {
    security_vulnerabilities: VulnerabilityConnection,
}

#[derive(Debug, Deserialize)]
struct VulnerabilityConnection {
    #[serde(default)]
    nodes: Vec<VulnerabilityNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VulnerabilityNode {
    advisory: AdvisoryNode,
    vulnerable_version_range: Option<String>,
    first_patched_version: Option<PatchedVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvisoryNode {
    ghsa_id: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    severity: String,
    published_at: Option<String>,
    updated_at: Option<String>,
    withdrawn_at: Option<String>,
    #[serde(default)]
    references: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct Reference {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PatchedVersion {
    identifier: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: String,
}

impl GitHubAdvisoryClient {
    pub fn new(client: Client, config: &AnalyzerConfig) -> Self {
        Self {
            client,
            graphql_url: config.endpoints.github_graphql_url.clone(),
            token: config.network.github_token.clone(),
            max_retries: config.network.max_retries,
            request_delay: config.network.request_delay(),
        }
    }
}

#[async_trait]
impl AdvisorySource for GitHubAdvisoryClient {
    async fn fetch_advisories(&self, package: &PackageIdentity) -> FetchResult<Vec<AdvisoryRecord>> {
        debug!("Fetching advisories for {}", package);

        let body = GraphQlRequest {
            query: ADVISORY_QUERY,
            variables: Variables {
                package_name: package.name(),
            },
        };

        let mut request = self.client.post(&self.graphql_url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = send_with_retry(SERVICE, request, self.max_retries, self.request_delay).await?;
        let response = check_status(SERVICE, response, Forbidden::MeansRateLimited)?;
        let payload: GraphQlResponse = decode_json(SERVICE, response).await?;

        let data = match payload.data {
            Some(data) => data,
            None => return Err(graphql_failure(&payload.errors)),
        };

        let advisories: Vec<AdvisoryRecord> = data
            .security_vulnerabilities
            .nodes
            .into_iter()
            .map(into_record)
            .collect();

        debug!("Found {} advisories for {}", advisories.len(), package);
        Ok(advisories)
    }
}

fn into_record(node: VulnerabilityNode) -> AdvisoryRecord {
    let advisory = node.advisory;

    let severity = Severity::from_label(&advisory.severity).unwrap_or_else(|| {
        debug!(
            "Unknown severity {:?} on {}, counting as moderate",
            advisory.severity, advisory.ghsa_id
        );
        Severity::Moderate
    });

    let url = advisory
        .references
        .into_iter()
        .next()
        .map(|r| r.url)
        .unwrap_or_else(|| format!("https://github.com/advisories/{}", advisory.ghsa_id));

    AdvisoryRecord {
        severity,
        url: Some(url),
        summary: advisory.summary,
        description: advisory.description,
        published_at: advisory.published_at.as_deref().and_then(parse_datetime),
        updated_at: advisory.updated_at.as_deref().and_then(parse_datetime),
        withdrawn_at: advisory.withdrawn_at.as_deref().and_then(parse_datetime),
        vulnerable_version_range: node.vulnerable_version_range.filter(|r| !r.trim().is_empty()),
        first_patched_version: node.first_patched_version.map(|p| p.identifier),
        id: advisory.ghsa_id,
    }
}

/// Classify a GraphQL `errors` array that came without data
fn graphql_failure(errors: &[GraphQlError]) -> FetchError {
    let Some(first) = errors.first() else {
        return FetchError::malformed(SERVICE, "Response carried neither data nor errors");
    };

    let kind = first.kind.as_deref().unwrap_or_default().to_ascii_uppercase();
    let message = first.message.to_ascii_lowercase();

    if kind == "RATE_LIMITED" || message.contains("rate limit") {
        FetchError::rate_limited(SERVICE, None)
    } else if kind == "FORBIDDEN"
        || message.contains("credentials")
        || message.contains("authentication")
        || message.contains("token")
    {
        FetchError::unauthorized(SERVICE, first.message.clone())
    } else {
        FetchError::malformed(SERVICE, first.message.clone())
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;
    use crate::sources::http::build_client;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::ServerGuard) -> GitHubAdvisoryClient {
        let mut config = AnalyzerConfig::default();
        config.endpoints.github_graphql_url = format!("{}/graphql", server.url());
        config.network.max_retries = 0;
        GitHubAdvisoryClient::new(build_client(&config.network).unwrap(), &config)
    }

    fn lodash_payload() -> String {
        json!({
            "data": {
                "securityVulnerabilities": {
                    "nodes": [
                        {
                            "advisory": {
                                "ghsaId": "GHSA-35jh-r3h4-6jhm",
                                "summary": "Command Injection in lodash",
                                "description": "template is vulnerable to command injection",
                                "severity": "HIGH",
                                "publishedAt": "2021-05-06T16:05:51Z",
                                "updatedAt": "2024-03-01T00:00:00Z",
                                "withdrawnAt": null,
                                "references": [{ "url": "https://nvd.nist.gov/vuln/detail/CVE-2021-23337" }]
                            },
                            "vulnerableVersionRange": "< 4.17.21",
                            "firstPatchedVersion": { "identifier": "4.17.21" }
                        },
                        {
                            "advisory": {
                                "ghsaId": "GHSA-xxxx-0000-test",
                                "summary": "Withdrawn",
                                "description": "",
                                "severity": "SEVERE",
                                "publishedAt": "2020-01-01T00:00:00Z",
                                "updatedAt": "2020-01-02T00:00:00Z",
                                "withdrawnAt": "2020-01-03T00:00:00Z",
                                "references": []
                            },
                            "vulnerableVersionRange": "",
                            "firstPatchedVersion": null
                        }
                    ]
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_fetch_advisories() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .match_body(Matcher::PartialJson(json!({ "variables": { "packageName": "lodash" } })))
            .with_status(200)
            .with_body(lodash_payload())
            .create_async()
            .await;

        let package = PackageIdentity::parse("lodash").unwrap();
        let advisories = client_for(&server).fetch_advisories(&package).await.unwrap();

        assert_eq!(advisories.len(), 2);

        let injection = &advisories[0];
        assert_eq!(injection.id, "GHSA-35jh-r3h4-6jhm");
        assert_eq!(injection.severity, Severity::High);
        assert_eq!(injection.first_patched_version.as_deref(), Some("4.17.21"));
        assert_eq!(
            injection.url.as_deref(),
            Some("https://nvd.nist.gov/vuln/detail/CVE-2021-23337")
        );

        let withdrawn = &advisories[1];
        assert!(withdrawn.is_withdrawn());
        assert_eq!(withdrawn.severity, Severity::Moderate);
        assert_eq!(withdrawn.vulnerable_version_range, None);
        assert_eq!(
            withdrawn.url.as_deref(),
            Some("https://github.com/advisories/GHSA-xxxx-0000-test")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_graphql_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(
                r#"{"data":null,"errors":[{"type":"RATE_LIMITED","message":"API rate limit exceeded for user"}]}"#,
            )
            .create_async()
            .await;

        let package = PackageIdentity::parse("lodash").unwrap();
        let err = client_for(&server).fetch_advisories(&package).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/graphql")
            .with_status(401)
            .with_body(r#"{"message":"This endpoint requires you to be authenticated."}"#)
            .create_async()
            .await;

        let package = PackageIdentity::parse("lodash").unwrap();
        let err = client_for(&server).fetch_advisories(&package).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unauthorized);
        assert!(err.remediation().is_some());
    }

    #[test]
    fn test_graphql_failure_classification() {
        let error = |kind: Option<&str>, message: &str| GraphQlError {
            kind: kind.map(String::from),
            message: message.to_string(),
        };

        assert_eq!(
            graphql_failure(&[error(None, "Bad credentials")]).kind,
            FetchErrorKind::Unauthorized
        );
        assert_eq!(
            graphql_failure(&[error(Some("FORBIDDEN"), "Resource not accessible")]).kind,
            FetchErrorKind::Unauthorized
        );
        assert_eq!(
            graphql_failure(&[error(None, "Field 'foo' doesn't exist")]).kind,
            FetchErrorKind::Malformed
        );
        assert_eq!(graphql_failure(&[]).kind, FetchErrorKind::Malformed);
    }
}
