//! # Software Versions
//!
//! Provides [`SoftwareVersion`], the build version string a controller or a
//! storage node reports about itself, together with a total ordering used by
//! the handshake's version floor.
//!
//! ## Ordering
//!
//! Version strings are compared with semver precedence whenever both sides
//! can be read as semver after lenient padding:
//!
//! | Reported | Read as |
//! |----------|---------|
//! | `"3"` | `3.0.0` |
//! | `"2.7"` | `2.7.0` |
//! | `"v3.4.1"` | `3.4.1` |
//! | `"3.4.0-SNAPSHOT"` | `3.4.0-SNAPSHOT` (pre-release, below `3.4.0`) |
//!
//! Build metadata (`+abc`) never affects precedence.
//!
//! If either side is not semver (e.g. `"3.4.0.1"` or `"r1234"`), both sides
//! fall back to a component-wise comparison: the string is split on `.`, `-`
//! and `_`; numeric components compare numerically, a numeric component
//! outranks a textual one, textual components compare case-insensitively, and
//! a missing trailing component equals `0` but outranks a textual qualifier.
//!
//! ## Safety
//!
//! - No `panic!`, `unwrap()`, `expect()`.
//! - Parsing never fails: every string has a defined position in the order.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════════════════════
// SOFTWARE VERSION
// ════════════════════════════════════════════════════════════════════════════════

/// A reported software build version.
///
/// The raw string is preserved verbatim for display and error messages;
/// ordering is computed from it on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SoftwareVersion(String);

impl SoftwareVersion {
    /// Wraps a raw version string. Leading/trailing whitespace is trimmed.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.len() == raw.len() {
            Self(raw)
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Returns the version string as reported.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the string reads as semver after lenient padding.
    pub fn is_semver(&self) -> bool {
        lenient_semver(&self.0).is_some()
    }

    /// Returns `true` if `self` is at or above `floor`.
    #[inline]
    pub fn satisfies_minimum(&self, floor: &SoftwareVersion) -> bool {
        self.cmp(floor) != Ordering::Less
    }
}

impl fmt::Display for SoftwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SoftwareVersion {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SoftwareVersion {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl PartialEq for SoftwareVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SoftwareVersion {}

impl PartialOrd for SoftwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SoftwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_versions(&self.0, &other.0)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// COMPARISON
// ════════════════════════════════════════════════════════════════════════════════

/// Compares two raw version strings. See the module docs for the rules.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (lenient_semver(a), lenient_semver(b)) {
        (Some(va), Some(vb)) => (va.major, va.minor, va.patch, &va.pre)
            .cmp(&(vb.major, vb.minor, vb.patch, &vb.pre)),
        _ => compare_components(a, b),
    }
}

/// Parses `raw` as semver, padding missing minor/patch components with zero.
fn lenient_semver(raw: &str) -> Option<semver::Version> {
    let s = raw.trim();
    let s = s.strip_prefix('v').or_else(|| s.strip_prefix('V')).unwrap_or(s);
    if s.is_empty() {
        return None;
    }

    // Split off pre-release / build suffix before counting core components.
    let core_end = s.find(['-', '+']).unwrap_or(s.len());
    let (core, suffix) = s.split_at(core_end);
    let parts = core.split('.').count();
    let padded = match parts {
        1 => format!("{}.0.0{}", core, suffix),
        2 => format!("{}.0{}", core, suffix),
        _ => s.to_string(),
    };
    semver::Version::parse(&padded).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Num(u64),
    Text(String),
}

fn components(raw: &str) -> Vec<Component> {
    raw.trim()
        .split(['.', '-', '_'])
        .filter(|c| !c.is_empty())
        .map(|c| match c.parse::<u64>() {
            Ok(n) => Component::Num(n),
            Err(_) => Component::Text(c.to_ascii_lowercase()),
        })
        .collect()
}

fn compare_components(a: &str, b: &str) -> Ordering {
    let ca = components(a);
    let cb = components(b);
    let len = ca.len().max(cb.len());

    for i in 0..len {
        let ord = match (ca.get(i), cb.get(i)) {
            (Some(Component::Num(x)), Some(Component::Num(y))) => x.cmp(y),
            (Some(Component::Num(_)), Some(Component::Text(_))) => Ordering::Greater,
            (Some(Component::Text(_)), Some(Component::Num(_))) => Ordering::Less,
            (Some(Component::Text(x)), Some(Component::Text(y))) => x.cmp(y),
            // Missing trailing component: behaves as 0, outranks a qualifier.
            (Some(Component::Num(x)), None) => x.cmp(&0),
            (None, Some(Component::Num(y))) => 0.cmp(y),
            (Some(Component::Text(_)), None) => Ordering::Less,
            (None, Some(Component::Text(_))) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> SoftwareVersion {
        SoftwareVersion::new(s)
    }

    #[test]
    fn test_plain_semver_ordering() {
        assert!(v("4.0.0") > v("3.0.0"));
        assert!(v("3.10.0") > v("3.9.9"));
        assert_eq!(v("3.0.0"), v("3.0.0"));
    }

    #[test]
    fn test_lenient_padding() {
        assert_eq!(v("3"), v("3.0.0"));
        assert_eq!(v("2.7"), v("2.7.0"));
        assert!(v("2.7") < v("2.7.1"));
        assert_eq!(v("v3.4.1"), v("3.4.1"));
    }

    #[test]
    fn test_prerelease_below_release() {
        assert!(v("3.4.0-SNAPSHOT") < v("3.4.0"));
        assert!(v("3.4.0-SNAPSHOT") > v("3.3.9"));
        assert!(v("3.4-SNAPSHOT") < v("3.4"));
    }

    #[test]
    fn test_build_metadata_ignored() {
        assert_eq!(v("3.4.0+abc"), v("3.4.0+def"));
    }

    #[test]
    fn test_component_fallback() {
        // Four numeric components is not semver.
        assert!(!v("3.4.0.1").is_semver());
        assert!(v("3.4.0.1") > v("3.4.0"));
        assert!(v("3.4.0.1") < v("3.4.1"));
        assert_eq!(v("3.4.0.0"), v("3.4.0"));
    }

    #[test]
    fn test_text_components() {
        assert!(v("r1234") < v("1"));
        assert!(v("3.4.0.x") < v("3.4.0"));
    }

    #[test]
    fn test_satisfies_minimum() {
        assert!(v("4.0.0").satisfies_minimum(&v("3.0.0")));
        assert!(v("3.0.0").satisfies_minimum(&v("3.0.0")));
        assert!(!v("3.0.0").satisfies_minimum(&v("4.0.0")));
        assert!(v("99.0.0").satisfies_minimum(&v("0.1.0")));
    }

    #[test]
    fn test_raw_string_preserved() {
        let ver = v("  3.4.0-SNAPSHOT ");
        assert_eq!(ver.as_str(), "3.4.0-SNAPSHOT");
        assert_eq!(ver.to_string(), "3.4.0-SNAPSHOT");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&v("3.1.0")).unwrap_or_default();
        assert_eq!(json, "\"3.1.0\"");
        let parsed: Result<SoftwareVersion, _> = serde_json::from_str("\"2.0\"");
        assert!(matches!(parsed, Ok(ref p) if *p == v("2.0.0")));
    }
}
