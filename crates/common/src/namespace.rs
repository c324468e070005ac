//! # Namespace Descriptor
//!
//! Metadata a controller returns from a version request. The descriptor
//! identifies the namespace a worker is about to join and the software and
//! layout versions the controller runs.
//!
//! ## Identity
//!
//! A descriptor carries two kinds of data:
//!
//! | Part | Fields | Checked by |
//! |------|--------|------------|
//! | Versioning | `software_version`, `layout_version` | worker version policy |
//! | Namespace identity | `namespace_id`, `cluster_id`, `block_pool_id` | session pinning |
//! | Informational | `created_at` | nobody |
//!
//! Descriptors are immutable once received. A new fetch produces a new
//! descriptor that replaces, never merges with, the previous one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::layout::LayoutVersion;
use crate::version::SoftwareVersion;

/// Namespace metadata reported by a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDescriptor {
    /// Controller build version.
    pub software_version: SoftwareVersion,
    /// On-disk metadata layout the controller runs.
    pub layout_version: LayoutVersion,
    /// Numeric namespace identifier.
    pub namespace_id: u64,
    /// Cluster identifier shared by every controller of the cluster.
    pub cluster_id: String,
    /// Block pool served by this namespace.
    pub block_pool_id: String,
    /// Namespace creation time (unix seconds).
    #[serde(default)]
    pub created_at: u64,
}

impl NamespaceDescriptor {
    pub fn new(
        software_version: impl Into<SoftwareVersion>,
        layout_version: LayoutVersion,
        namespace_id: u64,
        cluster_id: impl Into<String>,
        block_pool_id: impl Into<String>,
    ) -> Self {
        Self {
            software_version: software_version.into(),
            layout_version,
            namespace_id,
            cluster_id: cluster_id.into(),
            block_pool_id: block_pool_id.into(),
            created_at: 0,
        }
    }

    /// Returns `true` if `other` describes the same namespace, regardless
    /// of the software/layout versions either controller runs.
    pub fn same_namespace(&self, other: &NamespaceDescriptor) -> bool {
        self.namespace_id == other.namespace_id
            && self.cluster_id == other.cluster_id
            && self.block_pool_id == other.block_pool_id
    }

    /// Short identity label used in logs and error messages.
    pub fn identity_label(&self) -> String {
        format!(
            "ns={} cluster={} pool={}",
            self.namespace_id, self.cluster_id, self.block_pool_id
        )
    }
}

impl fmt::Display for NamespaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (software {}, layout {})",
            self.identity_label(),
            self.software_version,
            self.layout_version
        )
    }
}
