//! Numeric version comparison and advisory range matching
//!
//! Versions are compared segment by segment with missing segments treated as
//! zero, so `5` equals `5.0.0`. Pre-release and build suffixes are ignored.
//! Ranges use the advisory-database syntax: single comparators such as
//! `< 4.17.21` or `<=8.3.4`, a bare version for an exact match, and
//! comma-separated conjunctions like `>= 1.0.0, < 2.0.0`.

use std::cmp::Ordering;
use tracing::debug;

/// A parsed numeric version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    segments: Vec<u64>,
}

impl Version {
    /// Parse a version, returning `None` when any segment is not numeric
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let trimmed = trimmed.strip_prefix('=').unwrap_or(trimmed).trim();

        // 1.2.3-beta.1+build -> 1.2.3
        let core = trimmed
            .split(|c| c == '-' || c == '+')
            .next()
            .unwrap_or("");

        if core.is_empty() {
            return None;
        }

        let segments = core
            .split('.')
            .map(|s| s.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        Some(Self { segments })
    }

    fn segment(&self, index: usize) -> u64 {
        self.segments.get(index).copied().unwrap_or(0)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

#[derive(Debug, Clone)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn parse(clause: &str) -> Option<Self> {
        let clause = clause.trim();
        let (op, rest) = if let Some(rest) = clause.strip_prefix("<=") {
            (Op::Le, rest)
        } else if let Some(rest) = clause.strip_prefix(">=") {
            (Op::Ge, rest)
        } else if let Some(rest) = clause.strip_prefix('<') {
            (Op::Lt, rest)
        } else if let Some(rest) = clause.strip_prefix('>') {
            (Op::Gt, rest)
        } else if let Some(rest) = clause.strip_prefix('=') {
            (Op::Eq, rest)
        } else {
            (Op::Eq, clause)
        };

        let rest = rest.trim();
        // Anything beyond a single version (`^1.2`, `1.x || 2.x`, ...) is unsupported
        if rest.contains(char::is_whitespace) {
            return None;
        }

        Some(Self {
            op,
            version: Version::parse(rest)?,
        })
    }

    fn matches(&self, version: &Version) -> bool {
        let ord = version.cmp(&self.version);
        match self.op {
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
            Op::Eq => ord == Ordering::Equal,
        }
    }
}

/// A conjunction of comparators
#[derive(Debug, Clone)]
pub struct VersionRange {
    comparators: Vec<Comparator>,
}

impl VersionRange {
    /// Parse a range, returning `None` for anything ambiguous
    pub fn parse(input: &str) -> Option<Self> {
        if input.trim().is_empty() {
            return None;
        }

        let comparators = input
            .split(',')
            .map(Comparator::parse)
            .collect::<Option<Vec<_>>>()?;

        Some(Self { comparators })
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.comparators.iter().all(|c| c.matches(version))
    }
}

/// Compare two version strings numerically
pub fn compare(a: &str, b: &str) -> Option<Ordering> {
    Some(Version::parse(a)?.cmp(&Version::parse(b)?))
}

/// Whether `version` falls inside `range`.
///
/// Unparseable input fails open and reports `true`: an advisory that cannot
/// be evaluated stays visible.
pub fn satisfies_range(version: &str, range: &str) -> bool {
    let Some(parsed_range) = VersionRange::parse(range) else {
        debug!("Ambiguous version range {:?}, treating as applicable", range);
        return true;
    };
    let Some(parsed_version) = Version::parse(version) else {
        debug!("Unparseable version {:?}, treating as applicable", version);
        return true;
    };

    parsed_range.contains(&parsed_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare() {
        assert_eq!(compare("1.2.3", "1.2.3"), Some(Ordering::Equal));
        assert_eq!(compare("2.0.0", "1.9.9"), Some(Ordering::Greater));
        assert_eq!(compare("1.9.9", "2.0.0"), Some(Ordering::Less));
        assert_eq!(compare("1.10.0", "1.9.0"), Some(Ordering::Greater));
    }

    #[test]
    fn test_compare_zero_pads() {
        assert_eq!(compare("5", "5.0.0"), Some(Ordering::Equal));
        assert_eq!(compare("5.1", "5.0.9"), Some(Ordering::Greater));
        assert_eq!(compare("v1.0.0", "1"), Some(Ordering::Equal));
    }

    #[test]
    fn test_compare_ignores_prerelease_suffix() {
        assert_eq!(compare("1.0.0-beta.2", "1.0.0"), Some(Ordering::Equal));
        assert_eq!(compare("1.0.0+build.5", "1.0.0"), Some(Ordering::Equal));
    }

    #[test]
    fn test_compare_rejects_garbage() {
        assert_eq!(compare("latest", "1.0.0"), None);
        assert_eq!(compare("1.x", "1.0.0"), None);
        assert_eq!(compare("", "1.0.0"), None);
    }

    #[test]
    fn test_single_operator_ranges() {
        assert!(!satisfies_range("8.3.5", "<8.3.5"));
        assert!(satisfies_range("8.3.4", "<8.3.5"));
        assert!(satisfies_range("8.3.4", "<=8.3.4"));
        assert!(!satisfies_range("8.3.5", "<=8.3.4"));
        assert!(satisfies_range("2.0.1", ">2.0.0"));
        assert!(!satisfies_range("2.0.0", ">2.0.0"));
        assert!(satisfies_range("2.0.0", ">=2.0.0"));
        assert!(satisfies_range("1.2.3", "= 1.2.3"));
        assert!(!satisfies_range("1.2.4", "=1.2.3"));
        assert!(satisfies_range("1.2.3", "1.2.3"));
    }

    #[test]
    fn test_conjunction_ranges() {
        assert!(satisfies_range("1.5.0", ">=1.0.0, <2.0.0"));
        assert!(!satisfies_range("2.0.0", ">=1.0.0, <2.0.0"));
        assert!(!satisfies_range("0.9.9", ">= 1.0.0, < 2.0.0"));
        assert!(satisfies_range("4.17.20", "< 4.17.21"));
    }

    #[test]
    fn test_malformed_ranges_fail_open() {
        assert!(satisfies_range("9.9.9", ""));
        assert!(satisfies_range("9.9.9", "^1.2.0"));
        assert!(satisfies_range("9.9.9", "1.x || 2.x"));
        assert!(satisfies_range("9.9.9", ">=1.0.0, <oops"));
        assert!(satisfies_range("not-a-version", "<1.0.0"));
    }
}
