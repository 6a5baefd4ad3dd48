//! Decides whether an advisory still applies to a package version

use crate::types::{AdvisoryRecord, SecuritySummary};
use crate::version::{compare, satisfies_range};
use std::cmp::Ordering;
use tracing::debug;

/// Whether `advisory` affects `current_version`.
///
/// Checked in order:
/// 1. withdrawn advisories never apply;
/// 2. a current version at or above the first patched version is cleared;
/// 3. otherwise the vulnerable range decides (unparseable ranges apply);
/// 4. with neither signal the advisory applies.
pub fn is_applicable(advisory: &AdvisoryRecord, current_version: &str) -> bool {
    if advisory.is_withdrawn() {
        return false;
    }

    if let Some(patched) = advisory.first_patched_version.as_deref() {
        match compare(current_version, patched) {
            Some(Ordering::Greater | Ordering::Equal) => {
                debug!(
                    "Skipping {} - already fixed in {} (patched in {})",
                    advisory.id, current_version, patched
                );
                return false;
            }
            Some(Ordering::Less) => {}
            None => debug!(
                "Cannot compare {} with patched version {} for {}",
                current_version, patched, advisory.id
            ),
        }
    }

    match advisory.vulnerable_version_range.as_deref() {
        Some(range) => satisfies_range(current_version, range),
        None => true,
    }
}

/// Fold raw advisories into the summary of those that apply.
///
/// Without a version every non-withdrawn advisory is kept.
pub fn summarize<I>(advisories: I, current_version: Option<&str>) -> SecuritySummary
where
    I: IntoIterator<Item = AdvisoryRecord>,
{
    let mut summary = SecuritySummary::default();

    for advisory in advisories {
        let applies = match current_version {
            Some(version) => is_applicable(&advisory, version),
            None => !advisory.is_withdrawn(),
        };
        if applies {
            summary.record(advisory);
        }
    }

    summary
}
