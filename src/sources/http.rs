//! HTTP plumbing shared by every source adapter

use crate::config::NetworkConfig;
use crate::error::{FetchError, FetchResult};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

pub(crate) const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by all adapters of one analyzer
pub(crate) fn build_client(config: &NetworkConfig) -> FetchResult<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.timeout())
        .build()
        .map_err(|e| FetchError::network("http", format!("Failed to build HTTP client: {}", e)))
}

/// How a 403 response is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Forbidden {
    /// GitHub answers 403 once the anonymous quota is gone
    MeansRateLimited,
    /// Rate limited only if the quota headers say so
    CheckHeaders,
}

/// Send a request, retrying transport failures and 429 with exponential backoff
pub(crate) async fn send_with_retry(
    service: &str,
    request: RequestBuilder,
    max_retries: u32,
    base_delay: Duration,
) -> FetchResult<Response> {
    let mut attempts = 0;
    let mut delay = base_delay;

    loop {
        let attempt = request
            .try_clone()
            .ok_or_else(|| FetchError::network(service, "Request body cannot be retried"))?;

        match attempt.send().await {
            Ok(response) => {
                if response.status() == StatusCode::TOO_MANY_REQUESTS && attempts < max_retries {
                    warn!("Rate limited by {}, retrying after {:?}", service, delay);
                    tokio::time::sleep(delay).await;
                    attempts += 1;
                    delay *= 2;
                    continue;
                }
                return Ok(response);
            }
            Err(e) => {
                if attempts >= max_retries {
                    let message = if e.is_timeout() {
                        format!("Request timed out: {}", e)
                    } else {
                        format!("Request failed: {}", e)
                    };
                    return Err(FetchError::network(service, message));
                }
                warn!("{} request failed, retrying: {}", service, e);
                tokio::time::sleep(delay).await;
                attempts += 1;
                delay *= 2;
            }
        }
    }
}

/// Map a non-success status onto a fetch error
pub(crate) fn check_status(
    service: &str,
    response: Response,
    forbidden: Forbidden,
) -> FetchResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let quota_exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    match status {
        StatusCode::NOT_FOUND => Err(FetchError::not_found(service, format!("HTTP {}", status))),
        StatusCode::UNAUTHORIZED => Err(FetchError::unauthorized(
            service,
            format!("HTTP {}: credentials missing or rejected", status),
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            Err(FetchError::rate_limited(service, retry_after(&response)))
        }
        StatusCode::FORBIDDEN
            if quota_exhausted || forbidden == Forbidden::MeansRateLimited =>
        {
            Err(FetchError::rate_limited(service, retry_after(&response)))
        }
        StatusCode::FORBIDDEN => Err(FetchError::unauthorized(service, format!("HTTP {}", status))),
        _ => Err(FetchError::network(service, format!("HTTP {}", status))),
    }
}

/// Decode a JSON body into a per-source schema
pub(crate) async fn decode_json<T: DeserializeOwned>(service: &str, response: Response) -> FetchResult<T> {
    let body = response
        .text()
        .await
        .map_err(|e| FetchError::network(service, format!("Failed to read response body: {}", e)))?;

    serde_json::from_str(&body)
        .map_err(|e| FetchError::malformed(service, format!("Unexpected response shape: {}", e)))
}

/// Read `retry-after` seconds or the `x-ratelimit-reset` epoch
fn retry_after(response: &Response) -> Option<Duration> {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    };

    if let Some(secs) = header("retry-after") {
        return Some(Duration::from_secs(secs));
    }

    header("x-ratelimit-reset").map(|reset| {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        Duration::from_secs(reset.saturating_sub(now))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;

    async fn status_of(status: usize, headers: &[(&str, &str)], forbidden: Forbidden) -> FetchErrorKind {
        let mut server = mockito::Server::new_async().await;
        let mut mock = server.mock("GET", "/status").with_status(status);
        for (name, value) in headers {
            mock = mock.with_header(*name, *value);
        }
        let _mock = mock.create_async().await;

        let client = build_client(&NetworkConfig::default()).unwrap();
        let response = client
            .get(format!("{}/status", server.url()))
            .send()
            .await
            .unwrap();

        check_status("test", response, forbidden).unwrap_err().kind
    }

    #[tokio::test]
    async fn test_status_mapping() {
        assert_eq!(status_of(404, &[], Forbidden::CheckHeaders).await, FetchErrorKind::NotFound);
        assert_eq!(status_of(401, &[], Forbidden::CheckHeaders).await, FetchErrorKind::Unauthorized);
        assert_eq!(status_of(429, &[], Forbidden::CheckHeaders).await, FetchErrorKind::RateLimited);
        assert_eq!(status_of(500, &[], Forbidden::CheckHeaders).await, FetchErrorKind::Network);
    }

    #[tokio::test]
    async fn test_forbidden_mapping() {
        assert_eq!(status_of(403, &[], Forbidden::CheckHeaders).await, FetchErrorKind::Unauthorized);
        assert_eq!(
            status_of(403, &[("x-ratelimit-remaining", "0")], Forbidden::CheckHeaders).await,
            FetchErrorKind::RateLimited
        );
        assert_eq!(
            status_of(403, &[], Forbidden::MeansRateLimited).await,
            FetchErrorKind::RateLimited
        );
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_persistent_429() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/busy")
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let client = build_client(&NetworkConfig::default()).unwrap();
        let request = client.get(format!("{}/busy", server.url()));
        let response = send_with_retry("test", request, 1, Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/json")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = build_client(&NetworkConfig::default()).unwrap();
        let response = client.get(format!("{}/json", server.url())).send().await.unwrap();
        let err = decode_json::<Vec<u32>>("test", response).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Malformed);
    }
}
