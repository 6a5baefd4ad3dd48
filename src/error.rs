//! Error types for package analysis

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Result type alias for a single upstream fetch
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Errors that abort an analysis
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Package \"{0}\" not found on npm registry")]
    NotFound(String),

    #[error("Failed to fetch package data: {0}")]
    Upstream(#[from] FetchError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AnalysisError {
    /// Create an invalid input error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Actionable follow-up for the user, when there is one
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::Upstream(e) => e.remediation(),
            _ => None,
        }
    }
}

/// Classification of an upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    NotFound,
    RateLimited,
    Unauthorized,
    Network,
    Malformed,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Network => write!(f, "network error"),
            Self::Malformed => write!(f, "malformed response"),
        }
    }
}

/// Failure of a single source adapter call
#[derive(Error, Debug, Clone)]
#[error("{service} {kind}: {message}")]
pub struct FetchError {
    pub service: String,
    pub kind: FetchErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl FetchError {
    pub fn new(service: impl Into<String>, kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn not_found(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, FetchErrorKind::NotFound, message)
    }

    pub fn rate_limited(service: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let service = service.into();
        let message = format!("{} API rate limit exceeded", service);
        Self {
            retry_after,
            ..Self::new(service, FetchErrorKind::RateLimited, message)
        }
    }

    pub fn unauthorized(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, FetchErrorKind::Unauthorized, message)
    }

    pub fn network(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, FetchErrorKind::Network, message)
    }

    pub fn malformed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service, FetchErrorKind::Malformed, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == FetchErrorKind::NotFound
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == FetchErrorKind::RateLimited
    }

    /// Text telling the user what to change, for failures they can fix
    pub fn remediation(&self) -> Option<&'static str> {
        match self.kind {
            FetchErrorKind::RateLimited => Some(
                "Rate limited: configure an access token (e.g. GITHUB_TOKEN) to raise the limit",
            ),
            FetchErrorKind::Unauthorized => {
                Some("Access denied: provide a valid access token (e.g. GITHUB_TOKEN)")
            }
            _ => None,
        }
    }
}

/// Failures of the AI verdict providers
#[derive(Error, Debug, Clone)]
pub enum NarrativeError {
    #[error("{provider} is not configured (missing API key)")]
    Unconfigured { provider: String },

    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: String },

    #[error("{provider} request failed: {message}")]
    Provider { provider: String, message: String },

    #[error("{provider} returned an unusable verdict: {message}")]
    Malformed { provider: String, message: String },

    #[error("No verdict providers configured")]
    NoProviders,
}

impl NarrativeError {
    /// Whether the next provider in a chain should be tried
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unconfigured { .. })
    }

    pub(crate) fn from_fetch(provider: &str, err: FetchError) -> Self {
        match err.kind {
            FetchErrorKind::RateLimited => Self::RateLimited {
                provider: provider.to_string(),
            },
            FetchErrorKind::Malformed => Self::Malformed {
                provider: provider.to_string(),
                message: err.message,
            },
            _ => Self::Provider {
                provider: provider.to_string(),
                message: err.message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remediation_distinguishes_kinds() {
        let limited = FetchError::rate_limited("GitHub", None);
        assert!(limited.remediation().unwrap().contains("access token"));

        let missing = FetchError::not_found("npm registry", "no such package");
        assert!(missing.remediation().is_none());

        let generic = FetchError::network("npm downloads", "connection reset");
        assert!(generic.remediation().is_none());
    }

    #[test]
    fn test_narrative_fallback_policy() {
        let limited = NarrativeError::from_fetch("Gemini", FetchError::rate_limited("Gemini", None));
        assert!(limited.allows_fallback());

        let broken = NarrativeError::from_fetch("Gemini", FetchError::network("Gemini", "HTTP 500"));
        assert!(!broken.allows_fallback());
    }
}
