//! # Keel Common Crate
//!
//! Data types shared by keel controllers and storage workers.
//!
//! ## Modules
//! - `version`: software version ordering
//! - `layout`: on-disk layout versions
//! - `namespace`: namespace descriptor returned by a version request
//! - `protocol`: registration and heartbeat messages

pub mod layout;
pub mod namespace;
pub mod protocol;
pub mod version;

pub use layout::{LayoutRelation, LayoutVersion, EXPECTED_CONTROLLER_LAYOUT_VERSION};
pub use namespace::NamespaceDescriptor;
pub use protocol::{
    ControllerCommand, HeartbeatResponse, NodeIdentity, NodeStatusReport, RegistrationAck,
};
pub use version::SoftwareVersion;
