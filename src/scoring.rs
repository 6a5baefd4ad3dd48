//! Heuristic quality score for a package
//!
//! Each available signal awards points (security at most 20, the others at
//! most 25). The score is the awarded total over 25 points per present
//! signal, scaled to 0-100. Missing signals are not counted at all.

use crate::types::{DownloadStats, PopularitySignal, RegistryMetadata, RepositoryStats, SecuritySummary};
use chrono::{DateTime, Utc};
use serde::Serialize;

const POINTS_PER_SIGNAL: u32 = 25;

/// Inputs to the quality score
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualitySignals {
    pub dependents: Option<u64>,
    pub stars: Option<u64>,
    pub monthly_downloads: Option<u64>,
    pub days_since_publish: Option<i64>,
    /// Applicable advisories; `None` when the advisory feed was unavailable
    pub vulnerability_count: Option<usize>,
}

impl QualitySignals {
    /// Collect the signals of an analysis. `security` is `None` when the
    /// advisory feed failed.
    pub fn from_parts(
        registry: &RegistryMetadata,
        downloads: Option<&DownloadStats>,
        popularity: Option<&PopularitySignal>,
        repository: Option<&RepositoryStats>,
        security: Option<&SecuritySummary>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            dependents: popularity.and_then(|p| p.dependents),
            stars: repository.map(|r| r.stars),
            monthly_downloads: downloads.map(|d| d.downloads),
            days_since_publish: registry.days_since_latest_publish(now),
            vulnerability_count: security.map(|s| s.total_count()),
        }
    }
}

/// Calculate the 0-100 quality score
pub fn calculate_quality_score(signals: &QualitySignals) -> u8 {
    let awarded = [
        popularity_points(signals.dependents, signals.stars),
        signals.monthly_downloads.map(download_points),
        signals.days_since_publish.map(maintenance_points),
        signals.vulnerability_count.map(security_points),
    ];

    let present: Vec<u32> = awarded.into_iter().flatten().collect();
    if present.is_empty() {
        return 0;
    }

    let total: u32 = present.iter().sum();
    let possible = POINTS_PER_SIGNAL * present.len() as u32;
    let score = (f64::from(total) / f64::from(possible) * 100.0).round();

    score.clamp(0.0, 100.0) as u8
}

/// Best of the dependents tier and the stars tier
fn popularity_points(dependents: Option<u64>, stars: Option<u64>) -> Option<u32> {
    match (dependents.map(reach_points), stars.map(reach_points)) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn reach_points(count: u64) -> u32 {
    match count {
        10_000.. => 25,
        5_000..=9_999 => 22,
        1_000..=4_999 => 18,
        500..=999 => 14,
        100..=499 => 10,
        10..=99 => 5,
        _ => 0,
    }
}

fn download_points(monthly: u64) -> u32 {
    match monthly {
        10_000_000.. => 25,
        1_000_000..=9_999_999 => 20,
        100_000..=999_999 => 15,
        10_000..=99_999 => 10,
        _ => 5,
    }
}

/// Staleness is penalized, never scored as zero
fn maintenance_points(days: i64) -> u32 {
    match days.max(0) {
        0..=89 => 25,
        90..=179 => 20,
        180..=364 => 15,
        365..=729 => 10,
        _ => 5,
    }
}

fn security_points(vulnerabilities: usize) -> u32 {
    match vulnerabilities {
        0 => 20,
        1..=2 => 15,
        3..=5 => 10,
        _ => 5,
    }
}
