//! Fetch download counts from the npm downloads API

use super::http::{check_status, decode_json, send_with_retry, Forbidden};
use super::npm_registry::encode_package_name;
use super::DownloadSource;
use crate::config::AnalyzerConfig;
use crate::error::FetchResult;
use crate::types::DownloadStats;
use crate::validation::PackageIdentity;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "npm downloads";

/// Client for `point/last-month` download counts
pub struct NpmDownloadsClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    request_delay: Duration,
}

impl NpmDownloadsClient {
    pub fn new(client: Client, config: &AnalyzerConfig) -> Self {
        Self {
            client,
            base_url: config.endpoints.downloads_url.trim_end_matches('/').to_string(),
            max_retries: config.network.max_retries,
            request_delay: config.network.request_delay(),
        }
    }
}

#[async_trait]
impl DownloadSource for NpmDownloadsClient {
    async fn fetch_downloads(&self, package: &PackageIdentity) -> FetchResult<DownloadStats> {
        debug!("Fetching monthly downloads for {}", package);

        let url = format!(
            "{}/point/last-month/{}",
            self.base_url,
            encode_package_name(package.name())
        );

        let response =
            send_with_retry(SERVICE, self.client.get(&url), self.max_retries, self.request_delay).await?;
        let response = check_status(SERVICE, response, Forbidden::CheckHeaders)?;

        decode_json(SERVICE, response).await
    }
}
