//! Prompt construction and verdict parsing

use crate::error::NarrativeError;
use crate::types::{AnalysisResult, Rating, Recommendation, Verdict};
use regex::Regex;
use serde::Deserialize;
use std::fmt::Write;
use std::sync::LazyLock;

pub(crate) const SYSTEM_PROMPT: &str = "You are an expert software engineer specialising in npm package evaluation. \
You analyse packages based on security, quality, maintenance, and popularity metrics. \
Provide honest, balanced assessments that help developers make informed decisions. \
Always respond in valid JSON format.";

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```(?:json)?").expect("valid pattern"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[\]}])").expect("valid pattern"));

const DEFAULT_SCORE: u8 = 50;

/// Build the user prompt for a finished analysis.
///
/// Ages are measured against `analyzed_at`, so the same result always
/// yields the same prompt.
pub(crate) fn build_prompt(result: &AnalysisResult) -> String {
    let registry = &result.registry;
    let now = result.analyzed_at;
    let mut prompt = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(prompt, "Analyse this npm package and provide a detailed assessment:\n");
    let _ = writeln!(prompt, "Package: {}", result.package);
    let _ = writeln!(prompt, "Version: {}", registry.latest_version);
    let _ = writeln!(prompt, "License: {}", registry.license.as_deref().unwrap_or("Unknown"));
    let _ = writeln!(
        prompt,
        "Description: {}",
        registry.description.as_deref().unwrap_or("No description")
    );
    let _ = writeln!(prompt, "npm URL: {}", result.npm_url());

    match result.days_since_last_publish() {
        Some(days) if days >= 0 => {
            let _ = writeln!(prompt, "Days Since Last Publish: {} days ago", days);
        }
        Some(_) => {
            let _ = writeln!(prompt, "Package recently published (within the last day)");
        }
        None => {}
    }
    if let Some(notice) = &registry.deprecated {
        let _ = writeln!(prompt, "Deprecation notice on the latest version: {}", notice);
    }
    prompt.push('\n');

    if let Some(downloads) = &result.downloads {
        let _ = writeln!(
            prompt,
            "Downloads (last month): {}\n",
            group_thousands(downloads.downloads)
        );
    }

    if let Some(repo) = &result.repository {
        let _ = writeln!(prompt, "{} Statistics:", repo.host);
        let _ = writeln!(prompt, "- Stars: {}", group_thousands(repo.stars));
        let _ = writeln!(prompt, "- Forks: {}", group_thousands(repo.forks));
        let _ = writeln!(prompt, "- Open Issues: {}", group_thousands(repo.open_issues));
        if let Some(pushed_at) = repo.pushed_at {
            let days = now.signed_duration_since(pushed_at).num_days();
            if days >= 0 {
                let _ = writeln!(prompt, "- Days Since Last Commit: {} days ago", days);
            } else {
                let _ = writeln!(prompt, "- Recently committed (within the last day)");
            }
        }
        if repo.archived {
            let _ = writeln!(prompt, "- Repository is ARCHIVED");
        }
        let _ = writeln!(prompt, "- Language: {}\n", repo.language.as_deref().unwrap_or("Unknown"));
    }

    let security = &result.security;
    let _ = writeln!(prompt, "Security Assessment:");
    let _ = writeln!(prompt, "- Total Vulnerabilities: {}", security.total_count());
    let _ = writeln!(prompt, "- Critical: {}", security.critical());
    let _ = writeln!(prompt, "- High: {}", security.high());
    let _ = writeln!(prompt, "- Moderate: {}", security.moderate());
    let _ = writeln!(prompt, "- Low: {}\n", security.low());

    if let Some(readme) = &registry.readme {
        let _ = writeln!(prompt, "README Content (first 3000 characters):");
        let _ = writeln!(prompt, "{}\n", readme);
        prompt.push_str(
            "CRITICAL: Check the README above for:\n\
             - Deprecation notices (e.g., \"no longer maintained\", \"deprecated\", \"unmaintained\")\n\
             - Migration warnings (e.g., \"please use X instead\", \"consider switching to Y\")\n\
             - Abandonment notices (e.g., \"this project is archived\", \"not actively developed\")\n\
             - Security warnings or end-of-life announcements\n\
             If ANY of these are present, the package MUST be rated as \"not-recommended\" or \"use-with-caution\" at best!\n\n",
        );
    }

    prompt.push_str(
        "IMPORTANT MAINTENANCE GUIDELINES:\n\
         - If \"Days Since Last Publish\" > 365 days (1 year), the package is likely UNMAINTAINED\n\
         - If \"Days Since Last Publish\" > 180 days (6 months), consider it STALE and rate maintenance as \"fair\" or \"poor\"\n\
         - If \"Days Since Last Commit\" > 180 days AND \"Days Since Last Publish\" > 180 days, it's likely ABANDONED\n\
         - High open issues count (>100) combined with no recent updates is a RED FLAG\n\
         - UNMAINTAINED packages should be \"not-recommended\" or \"use-with-caution\" at best\n\n",
    );

    prompt.push_str(
        "Based on this data, provide:\n\
         1. A brief summary (2-3 sentences) - MUST mention if package appears unmaintained/stale\n\
         2. Overall recommendation: \"recommended\", \"use-with-caution\", or \"not-recommended\"\n\
         3. Key strengths (array of 3-5 strings)\n\
         4. Any concerns (array of 2-4 strings, or [\"None\"] if no concerns) - MUST flag lack of maintenance if applicable\n\
         5. Overall score (0-100) - Deduct significant points for unmaintained packages\n\
         6. Security rating: \"excellent\", \"good\", \"fair\", or \"poor\"\n\
         7. Quality rating: \"excellent\", \"good\", \"fair\", or \"poor\"\n\
         8. Maintenance rating: \"excellent\", \"good\", \"fair\", or \"poor\" - Base this on actual dates, not just the score\n\
         9. Reasoning for your recommendation (2-3 sentences) - Explain maintenance concerns if present\n\n",
    );

    prompt.push_str(
        "Respond ONLY with valid JSON in this exact format:\n\
         {\n\
         \x20 \"summary\": \"string\",\n\
         \x20 \"recommendation\": \"recommended|use-with-caution|not-recommended\",\n\
         \x20 \"strengths\": [\"string1\", \"string2\", \"string3\"],\n\
         \x20 \"concerns\": [\"string1\", \"string2\"],\n\
         \x20 \"overallScore\": number,\n\
         \x20 \"securityRating\": \"excellent|good|fair|poor\",\n\
         \x20 \"qualityRating\": \"excellent|good|fair|poor\",\n\
         \x20 \"maintenanceRating\": \"excellent|good|fair|poor\",\n\
         \x20 \"reasoning\": \"string\"\n\
         }\n\n\
         Do not include any text outside the JSON object.",
    );

    prompt
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawVerdict {
    summary: Option<String>,
    recommendation: Option<String>,
    strengths: Option<TextList>,
    concerns: Option<TextList>,
    overall_score: Option<serde_json::Value>,
    security_rating: Option<String>,
    quality_rating: Option<String>,
    maintenance_rating: Option<String>,
    reasoning: Option<String>,
}

/// Models answer with either a list or a single string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextList {
    Many(Vec<serde_json::Value>),
    One(String),
}

impl TextList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::Many(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
                    _ => None,
                })
                .collect(),
            Self::One(s) if !s.trim().is_empty() => vec![s],
            Self::One(_) => Vec::new(),
        }
    }
}

/// Parse a model response into a verdict.
///
/// Tolerates code fences, surrounding prose and trailing commas. Missing
/// fields fall back to neutral defaults; a response with no JSON object
/// at all is an error.
pub(crate) fn parse_verdict(provider: &str, response: &str) -> Result<Verdict, NarrativeError> {
    let malformed = |message: String| NarrativeError::Malformed {
        provider: provider.to_string(),
        message,
    };

    let cleaned = CODE_FENCE.replace_all(response, "");
    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => return Err(malformed("No JSON object in response".to_string())),
    };

    let json = TRAILING_COMMA.replace_all(json, "$1");
    let json: String = json.chars().filter(char::is_ascii).collect();

    let raw: RawVerdict =
        serde_json::from_str(&json).map_err(|e| malformed(format!("Invalid JSON: {}", e)))?;

    let summary = raw.summary.filter(|s| !s.trim().is_empty()).unwrap_or_default();

    let mut strengths = raw.strengths.map(TextList::into_vec).unwrap_or_default();
    if strengths.is_empty() {
        strengths.push("Unable to identify specific strengths from data".to_string());
    }
    let mut concerns = raw.concerns.map(TextList::into_vec).unwrap_or_default();
    if concerns.is_empty() {
        concerns.push("Unable to identify specific concerns from data".to_string());
    }

    let reasoning = raw
        .reasoning
        .filter(|r| !r.trim().is_empty())
        .or_else(|| (!summary.is_empty()).then(|| summary.clone()))
        .unwrap_or_else(|| "Analysis based on package metrics".to_string());

    Ok(Verdict {
        recommendation: raw
            .recommendation
            .as_deref()
            .and_then(parse_recommendation)
            .unwrap_or(Recommendation::UseWithCaution),
        strengths,
        concerns,
        overall_score: raw.overall_score.as_ref().map_or(DEFAULT_SCORE, parse_score),
        security_rating: parse_rating(raw.security_rating.as_deref()),
        quality_rating: parse_rating(raw.quality_rating.as_deref()),
        maintenance_rating: parse_rating(raw.maintenance_rating.as_deref()),
        summary,
        reasoning,
        model: None,
    })
}

fn parse_recommendation(label: &str) -> Option<Recommendation> {
    match label.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
        "recommended" => Some(Recommendation::Recommended),
        "use-with-caution" => Some(Recommendation::UseWithCaution),
        "not-recommended" => Some(Recommendation::NotRecommended),
        _ => None,
    }
}

fn parse_rating(label: Option<&str>) -> Rating {
    match label.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some("excellent") => Rating::Excellent,
        Some("good") => Rating::Good,
        Some("poor") => Rating::Poor,
        _ => Rating::Fair,
    }
}

fn parse_score(value: &serde_json::Value) -> u8 {
    let score = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches("/100").trim().parse().ok(),
        _ => None,
    };

    match score {
        Some(score) if score.is_finite() => score.round().clamp(0.0, 100.0) as u8,
        _ => DEFAULT_SCORE,
    }
}

/// `1234567` as `1,234,567`
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
