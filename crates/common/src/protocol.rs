//! # Worker ↔ Controller Messages
//!
//! Request/response payloads of the registration protocol other than the
//! namespace descriptor itself.
//!
//! ```text
//! Worker                                   Controller
//!  │  version request ─────────────────────▶ │
//!  │ ◀──────────────────── NamespaceDescriptor│
//!  │  register(NodeIdentity) ──────────────▶ │
//!  │ ◀──────────────────────── RegistrationAck│
//!  │  heartbeat(NodeStatusReport) ─────────▶ │   (every interval)
//!  │ ◀────────────────────── HeartbeatResponse│
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::layout::LayoutVersion;
use crate::version::SoftwareVersion;

// ════════════════════════════════════════════════════════════════════════════════
// REGISTRATION
// ════════════════════════════════════════════════════════════════════════════════

/// Identity a worker presents when registering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Unique node identifier.
    pub node_id: String,
    /// Address other parties use to reach the node's data service.
    pub node_addr: String,
    /// Worker build version, so the controller can enforce its own floor.
    pub software_version: SoftwareVersion,
    /// Advertised storage capacity in gigabytes.
    pub capacity_gb: u64,
    /// Arbitrary key-value metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
}

/// Controller acknowledgement of a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationAck {
    /// Identifier the controller assigned to this registration.
    pub registration_id: String,
    /// `false` if the controller refuses to admit the node.
    pub accepted: bool,
    /// Refusal reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RegistrationAck {
    pub fn accepted(registration_id: impl Into<String>) -> Self {
        Self {
            registration_id: registration_id.into(),
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            registration_id: String::new(),
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// HEARTBEAT
// ════════════════════════════════════════════════════════════════════════════════

/// Liveness report sent on every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusReport {
    pub node_id: String,
    pub registration_id: String,
    /// Monotonic per-session heartbeat counter, starting at 1.
    pub sequence: u64,
    pub capacity_gb: u64,
    /// Unix seconds at send time.
    pub timestamp: u64,
}

/// Opaque instruction returned by a heartbeat. Interpreting commands is the
/// job of the node's data services, not of the session layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerCommand {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Controller reply to a heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<ControllerCommand>,
    /// The controller no longer knows this registration and asks the worker
    /// to handshake again.
    #[serde(default)]
    pub reregister: bool,
    /// Controller build answering this heartbeat, if it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<SoftwareVersion>,
    /// Controller layout answering this heartbeat, if it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_version: Option<LayoutVersion>,
}

impl HeartbeatResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn reregister() -> Self {
        Self {
            reregister: true,
            ..Self::default()
        }
    }

    /// Attaches the controller's current `(software, layout)` pair.
    #[must_use]
    pub fn with_versions(
        mut self,
        software_version: impl Into<SoftwareVersion>,
        layout_version: LayoutVersion,
    ) -> Self {
        self.software_version = Some(software_version.into());
        self.layout_version = Some(layout_version);
        self
    }
}
