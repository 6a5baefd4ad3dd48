//! Fetch package metadata from the npm registry

use super::http::{check_status, decode_json, send_with_retry, Forbidden};
use super::RegistrySource;
use crate::config::AnalyzerConfig;
use crate::error::{FetchError, FetchResult};
use crate::types::RegistryMetadata;
use crate::validation::PackageIdentity;
use crate::version::Version;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "npm registry";
const README_LIMIT: usize = 3000;

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid pattern"));
static MARKDOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid pattern"));

/// Client for package documents on the npm registry
pub struct NpmRegistryClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    request_delay: Duration,
}

impl NpmRegistryClient {
    pub fn new(client: Client, config: &AnalyzerConfig) -> Self {
        Self {
            client,
            base_url: config.endpoints.registry_url.trim_end_matches('/').to_string(),
            max_retries: config.network.max_retries,
            request_delay: config.network.request_delay(),
        }
    }
}

/// Package document as served by `GET /{name}`
#[derive(Debug, Deserialize)]
struct PackageDocument {
    name: String,
    #[serde(default, deserialize_with = "lenient")]
    description: Option<String>,
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
    // Old manifests carry arbitrary shapes; only the latest one is decoded
    #[serde(default)]
    versions: HashMap<String, Value>,
    #[serde(default)]
    time: HashMap<String, TimeEntry>,
    #[serde(default, deserialize_with = "lenient")]
    maintainers: Option<Vec<Person>>,
    #[serde(default, deserialize_with = "lenient")]
    readme: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    homepage: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    repository: Option<RepositoryField>,
    #[serde(default, deserialize_with = "lenient")]
    license: Option<LicenseField>,
}

/// Latest manifest. Publishers put all sorts of shapes in these fields, so
/// each one is dropped on its own when it does not decode.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionManifest {
    #[serde(default, deserialize_with = "lenient")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    license: Option<LicenseField>,
    #[serde(default, deserialize_with = "lenient")]
    homepage: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    repository: Option<RepositoryField>,
    #[serde(default, deserialize_with = "lenient")]
    keywords: Option<Keywords>,
    #[serde(default, deserialize_with = "string_map")]
    dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient")]
    deprecated: Option<Deprecation>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Name to range map, skipping entries whose range is not a string
fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = match Value::deserialize(deserializer)? {
        Value::Object(entries) => entries
            .into_iter()
            .filter_map(|(name, range)| match range {
                Value::String(range) => Some((name, range)),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    };
    Ok(map)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimeEntry {
    Stamp(String),
    // `unpublished` holds an object
    Other(IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Person {
    Object { name: Option<String> },
    Plain(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RepositoryField {
    Url(String),
    Object { url: Option<String> },
}

impl RepositoryField {
    fn url(&self) -> Option<String> {
        match self {
            Self::Url(url) => Some(url.clone()),
            Self::Object { url } => url.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LicenseField {
    Id(String),
    Object {
        #[serde(rename = "type")]
        kind: Option<String>,
    },
}

impl LicenseField {
    fn id(&self) -> Option<String> {
        match self {
            Self::Id(id) => Some(id.clone()),
            Self::Object { kind } => kind.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Keywords {
    // Non-string items are skipped
    List(Vec<Value>),
    Single(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Deprecation {
    Message(String),
    Flag(bool),
}

#[async_trait]
impl RegistrySource for NpmRegistryClient {
    async fn fetch_metadata(&self, package: &PackageIdentity) -> FetchResult<RegistryMetadata> {
        debug!("Fetching registry metadata for {}", package);

        let url = format!("{}/{}", self.base_url, encode_package_name(package.name()));
        let request = self.client.get(&url).header(reqwest::header::ACCEPT, "application/json");

        let response = send_with_retry(SERVICE, request, self.max_retries, self.request_delay).await?;
        let response = check_status(SERVICE, response, Forbidden::CheckHeaders).map_err(|e| {
            if e.is_not_found() {
                FetchError::not_found(
                    SERVICE,
                    format!("Package \"{}\" not found on npm registry", package),
                )
            } else {
                e
            }
        })?;

        let document: PackageDocument = decode_json(SERVICE, response).await?;
        into_metadata(document)
    }
}

fn into_metadata(document: PackageDocument) -> FetchResult<RegistryMetadata> {
    let latest_version = document
        .dist_tags
        .get("latest")
        .cloned()
        .or_else(|| highest_version(document.versions.keys()))
        .ok_or_else(|| FetchError::malformed(SERVICE, "Package has no published versions"))?;

    let manifest: VersionManifest = match document.versions.get(&latest_version) {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            FetchError::malformed(SERVICE, format!("Unexpected manifest for {}: {}", latest_version, e))
        })?,
        None => VersionManifest::default(),
    };

    let mut publish_times = BTreeMap::new();
    let mut created_at = None;
    let mut modified_at = None;
    for (key, entry) in &document.time {
        let TimeEntry::Stamp(stamp) = entry else {
            continue;
        };
        let Some(parsed) = parse_datetime(stamp) else {
            continue;
        };
        match key.as_str() {
            "created" => created_at = Some(parsed),
            "modified" => modified_at = Some(parsed),
            version => {
                publish_times.insert(version.to_string(), parsed);
            }
        }
    }

    let description = manifest
        .description
        .or(document.description)
        .and_then(|d| sanitize_description(&d));

    let keywords = match manifest.keywords {
        Some(Keywords::List(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect(),
        Some(Keywords::Single(single)) => single
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        None => Vec::new(),
    };

    let maintainers = document
        .maintainers
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| match p {
            Person::Object { name } => name,
            Person::Plain(name) => Some(name),
        })
        .collect();

    let deprecated = match manifest.deprecated {
        Some(Deprecation::Message(msg)) if !msg.trim().is_empty() => Some(msg),
        Some(Deprecation::Flag(true)) => Some("deprecated".to_string()),
        _ => None,
    };

    Ok(RegistryMetadata {
        name: document.name,
        latest_version,
        description,
        license: manifest.license.or(document.license).and_then(|l| l.id()),
        homepage: manifest.homepage.or(document.homepage),
        repository_url: manifest
            .repository
            .or(document.repository)
            .and_then(|r| r.url()),
        keywords,
        maintainers,
        publish_times,
        created_at,
        modified_at,
        dependencies: manifest.dependencies,
        dev_dependencies: manifest.dev_dependencies,
        version_count: document.versions.len(),
        deprecated,
        readme: document.readme.and_then(|r| truncate_readme(&r)),
    })
}

/// `@scope/name` is requested as `@scope%2fname`
pub(crate) fn encode_package_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replacen('/', "%2f", 1)
    } else {
        name.to_string()
    }
}

fn highest_version<'a>(versions: impl Iterator<Item = &'a String>) -> Option<String> {
    versions
        .filter_map(|v| Version::parse(v).map(|parsed| (parsed, v)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, v)| v.clone())
}

/// Strip HTML and markdown images some packages put in their description
fn sanitize_description(raw: &str) -> Option<String> {
    let text = HTML_TAG.replace_all(raw, " ");
    let text = MARKDOWN_IMAGE.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = text.trim();

    (!text.is_empty()).then(|| text.to_string())
}

fn truncate_readme(readme: &str) -> Option<String> {
    let readme = readme.trim();
    if readme.is_empty() || readme.starts_with("ERROR: No README data found") {
        return None;
    }
    Some(readme.chars().take(README_LIMIT).collect())
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::error::FetchErrorKind;
    use crate::sources::http::build_client;

    const LEFT_PAD: &str = r#"{
        "name": "left-pad",
        "description": "String left pad",
        "dist-tags": { "latest": "1.3.0" },
        "versions": {
            "1.2.0": { "dependencies": [] },
            "1.3.0": {
                "description": "<b>String</b> left pad ![badge](https://img.shields.io/x.svg)",
                "license": "WTFPL",
                "repository": { "type": "git", "url": "git+https://github.com/stevemao/left-pad.git" },
                "keywords": ["leftpad", "left", "pad"],
                "devDependencies": { "tape": "*" },
                "deprecated": "use String.prototype.padStart()"
            }
        },
        "time": {
            "created": "2014-03-14T16:39:52.466Z",
            "modified": "2022-06-19T12:09:48.617Z",
            "1.2.0": "2017-11-30T02:41:39.209Z",
            "1.3.0": "2018-04-09T03:41:50.398Z"
        },
        "maintainers": [{ "name": "stevemao", "email": "x@example.com" }],
        "readme": "left-pad\n========"
    }"#;

    fn client_for(server: &mockito::ServerGuard) -> NpmRegistryClient {
        let mut config = AnalyzerConfig::default();
        config.endpoints.registry_url = server.url();
        config.network = NetworkConfig {
            max_retries: 0,
            ..NetworkConfig::default()
        };
        NpmRegistryClient::new(build_client(&config.network).unwrap(), &config)
    }

    #[tokio::test]
    async fn test_fetch_metadata() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/left-pad")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(LEFT_PAD)
            .create_async()
            .await;

        let package = PackageIdentity::parse("left-pad").unwrap();
        let meta = client_for(&server).fetch_metadata(&package).await.unwrap();

        assert_eq!(meta.name, "left-pad");
        assert_eq!(meta.latest_version, "1.3.0");
        assert_eq!(meta.description.as_deref(), Some("String left pad"));
        assert_eq!(meta.license.as_deref(), Some("WTFPL"));
        assert_eq!(
            meta.repository_url.as_deref(),
            Some("git+https://github.com/stevemao/left-pad.git")
        );
        assert_eq!(meta.keywords.len(), 3);
        assert_eq!(meta.maintainers, vec!["stevemao".to_string()]);
        assert_eq!(meta.version_count, 2);
        assert!(meta.latest_publish_time().is_some());
        assert!(meta.created_at.is_some());
        assert!(!meta.publish_times.contains_key("created"));
        assert!(meta.dev_dependencies.contains_key("tape"));
        assert!(meta.deprecated.is_some());
        assert!(meta.readme.unwrap().starts_with("left-pad"));
    }

    #[tokio::test]
    async fn test_missing_package_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/this-package-definitely-does-not-exist-xyz")
            .with_status(404)
            .with_body(r#"{"error":"Not found"}"#)
            .create_async()
            .await;

        let package = PackageIdentity::parse("this-package-definitely-does-not-exist-xyz").unwrap();
        let err = client_for(&server).fetch_metadata(&package).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::NotFound);
        assert!(err.message.contains("not found on npm registry"));
    }

    #[tokio::test]
    async fn test_document_without_versions_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/empty")
            .with_status(200)
            .with_body(r#"{"name":"empty","time":{"unpublished":{"time":"2020-01-01T00:00:00.000Z"}}}"#)
            .create_async()
            .await;

        let package = PackageIdentity::parse("empty").unwrap();
        let err = client_for(&server).fetch_metadata(&package).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Malformed);
    }

    fn metadata_for_manifest(manifest: &str) -> RegistryMetadata {
        let body = format!(
            r#"{{"name":"odd","dist-tags":{{"latest":"1.0.0"}},"versions":{{"1.0.0":{}}}}}"#,
            manifest
        );
        let document: PackageDocument = serde_json::from_str(&body).unwrap();
        into_metadata(document).unwrap()
    }

    #[test]
    fn test_legacy_dependency_array_is_dropped() {
        let meta = metadata_for_manifest(r#"{"dependencies": [], "license": "MIT"}"#);
        assert!(meta.dependencies.is_empty());
        assert_eq!(meta.license.as_deref(), Some("MIT"));
    }

    #[test]
    fn test_null_keyword_is_skipped() {
        let meta = metadata_for_manifest(r#"{"keywords": ["a", null, 3, " b "]}"#);
        assert_eq!(meta.keywords, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_array_homepage_is_dropped() {
        let meta = metadata_for_manifest(
            r#"{"homepage": ["http://a"], "dependencies": {"x": "^1.0.0", "y": {"version": "2"}}}"#,
        );
        assert_eq!(meta.homepage, None);
        assert_eq!(meta.dependencies.len(), 1);
        assert_eq!(meta.dependencies["x"], "^1.0.0");
    }

    #[test]
    fn test_odd_license_and_deprecation_are_dropped() {
        let meta = metadata_for_manifest(r#"{"license": 42, "deprecated": 7, "description": null}"#);
        assert_eq!(meta.license, None);
        assert_eq!(meta.deprecated, None);
        assert_eq!(meta.description, None);
    }

    #[test]
    fn test_latest_falls_back_to_highest_version() {
        let keys = ["1.9.0".to_string(), "1.10.0".to_string(), "canary".to_string()];
        assert_eq!(highest_version(keys.iter()), Some("1.10.0".to_string()));
    }

    #[test]
    fn test_encode_scoped_name() {
        assert_eq!(encode_package_name("@babel/core"), "@babel%2fcore");
        assert_eq!(encode_package_name("react"), "react");
    }

    #[test]
    fn test_sanitize_description() {
        assert_eq!(
            sanitize_description("<p>Fast</p>\n\n  utility   belt"),
            Some("Fast utility belt".to_string())
        );
        assert_eq!(sanitize_description("![logo](logo.png)"), None);
    }

    #[test]
    fn test_readme_truncated() {
        let long = "a".repeat(5000);
        assert_eq!(truncate_readme(&long).unwrap().len(), README_LIMIT);
        assert_eq!(truncate_readme("ERROR: No README data found!"), None);
    }
}
