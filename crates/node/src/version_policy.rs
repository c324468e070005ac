//! # Version Compatibility Policy
//!
//! Pure validation of a [`NamespaceDescriptor`] against the node's
//! [`NodeConfig`], run synchronously after every namespace fetch.
//!
//! ## Rules (strict order)
//!
//! 1. **Software version floor**: `descriptor.software_version` below
//!    `config.minimum_controller_version` →
//!    [`VersionError::IncompatibleSoftwareVersion`]. Equal or greater passes,
//!    including versions far newer than the node's own.
//! 2. **Layout version**: compared against the expected layout constant.
//!    A mismatch is **reported, not rejected**: it is returned as
//!    [`LayoutCheck::Mismatch`] inside an `Ok` report. Layout incompatibility
//!    can only be judged by the components that interpret specific on-disk
//!    structures.
//!
//! A controller version that passes the floor but differs from the node's
//! own build is noted in [`CompatibilityReport::version_differs`].
//!
//! ## Purity
//!
//! No I/O, no logging, no state. The caller decides what to do with the
//! report; the policy never retries or swallows.

use keel_common::{LayoutRelation, LayoutVersion, NamespaceDescriptor};

use crate::config::NodeConfig;
use crate::error::VersionError;

/// Outcome of the layout comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutCheck {
    Match,
    Mismatch {
        expected: LayoutVersion,
        reported: LayoutVersion,
        relation: LayoutRelation,
    },
}

impl LayoutCheck {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }
}

/// Non-fatal findings of a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatibilityReport {
    pub layout: LayoutCheck,
    /// Controller build differs from the node's own build (but passed the floor).
    pub version_differs: bool,
}

/// Validates `descriptor` against `config` and the node's compiled-in
/// `expected_layout`.
pub fn validate(
    descriptor: &NamespaceDescriptor,
    config: &NodeConfig,
    expected_layout: LayoutVersion,
) -> Result<CompatibilityReport, VersionError> {
    // Rule 1: software version floor
    if !descriptor
        .software_version
        .satisfies_minimum(&config.minimum_controller_version)
    {
        return Err(VersionError::IncompatibleSoftwareVersion {
            reported: descriptor.software_version.to_string(),
            minimum: config.minimum_controller_version.to_string(),
        });
    }

    // Rule 2: layout version, reported only
    let layout = match expected_layout.relation_of(descriptor.layout_version) {
        LayoutRelation::Same => LayoutCheck::Match,
        relation => LayoutCheck::Mismatch {
            expected: expected_layout,
            reported: descriptor.layout_version,
            relation,
        },
    };

    Ok(CompatibilityReport {
        layout,
        version_differs: descriptor.software_version != config.node_software_version,
    })
}
