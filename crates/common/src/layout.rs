//! # Layout Versions
//!
//! A layout version identifies the on-disk structural format of namespace
//! metadata. By cluster convention layout versions are negative integers and
//! each format revision decrements the value: a **more negative** layout
//! version is **newer**.
//!
//! ```text
//!   older ◀──────────────────────────────▶ newer
//!     -60      -63      -66      -69
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Controller metadata layout this build of the worker was written against.
pub const EXPECTED_CONTROLLER_LAYOUT_VERSION: LayoutVersion = LayoutVersion(-66);

/// On-disk metadata layout version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayoutVersion(pub i32);

/// How a reported layout version relates to the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutRelation {
    /// Identical format.
    Same,
    /// The controller runs a newer format than this worker was built for.
    ControllerNewer,
    /// The controller runs an older format than this worker was built for.
    ControllerOlder,
}

impl LayoutVersion {
    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Returns `true` if `self` denotes a newer format than `other`.
    #[inline]
    pub fn is_newer_than(self, other: LayoutVersion) -> bool {
        self.0 < other.0
    }

    /// Classifies a `reported` layout against `self` as the expected one.
    pub fn relation_of(self, reported: LayoutVersion) -> LayoutRelation {
        if reported == self {
            LayoutRelation::Same
        } else if reported.is_newer_than(self) {
            LayoutRelation::ControllerNewer
        } else {
            LayoutRelation::ControllerOlder
        }
    }
}

impl fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LayoutRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Same => write!(f, "same"),
            Self::ControllerNewer => write!(f, "controller_newer"),
            Self::ControllerOlder => write!(f, "controller_older"),
        }
    }
}
