//! npm package name extraction and validation
//!
//! Accepted form is `(@scope/)?name`, as described by
//! <https://github.com/npm/validate-npm-package-name>.

use crate::error::{AnalysisError, Result};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(@[a-z0-9\-~][a-z0-9\-._~]*/)?[a-z0-9\-~][a-z0-9\-._~]*$")
        .expect("package name pattern is valid")
});

const MISSING_NAME: &str = "Package name is required";
const SCOPE_WITHOUT_PACKAGE: &str =
    "Scoped packages must include the package name. Example: @graphql-inspector/core";
const INVALID_FORMAT: &str =
    "Invalid package name format. Use \"package-name\" or \"@scope/package-name\"";

/// A validated npm package name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PackageIdentity {
    name: String,
}

impl PackageIdentity {
    /// Extract the first token of `raw` and validate it
    pub fn parse(raw: &str) -> Result<Self> {
        let name = extract_package_name(raw);
        validate_package_name(name).map_err(AnalysisError::invalid)?;
        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope segment without the leading `@`, if any
    pub fn scope(&self) -> Option<&str> {
        self.name
            .strip_prefix('@')
            .and_then(|rest| rest.split_once('/'))
            .map(|(scope, _)| scope)
    }
}

impl std::fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Take the first whitespace-delimited token of the input.
///
/// `"@graphql-inspector/cli graphql"` yields `"@graphql-inspector/cli"`.
pub fn extract_package_name(input: &str) -> &str {
    input.split_whitespace().next().unwrap_or("")
}

/// Validate a package name, returning a human-readable reason on failure
pub fn validate_package_name(input: &str) -> std::result::Result<(), &'static str> {
    let name = extract_package_name(input);

    if name.is_empty() {
        return Err(MISSING_NAME);
    }

    if PACKAGE_NAME.is_match(name) {
        return Ok(());
    }

    if name.starts_with('@') && !name.contains('/') {
        return Err(SCOPE_WITHOUT_PACKAGE);
    }

    Err(INVALID_FORMAT)
}
