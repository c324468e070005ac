//! # Keel Worker Node
//!
//! Worker-side registration protocol: a node connects to one or more
//! controllers, checks that each controller is compatible, registers, then
//! heartbeats for as long as the process runs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           NodeSessionGroup                           │
//! │   should_run / stopped()      on_actor_failed()     on_commands()    │
//! └────────┬──────────────────────────┬──────────────────────────────────┘
//!          │ one task per controller  │
//!          ▼                          ▼
//! ┌────────────────────┐    ┌────────────────────┐
//! │ WorkerSessionActor │    │ WorkerSessionActor │   ...
//! │  ├─ StateTracker   │    │  ├─ StateTracker   │
//! │  ├─ SessionMetrics │    │  ├─ SessionMetrics │
//! │  └─ ControllerClient (HTTP or mock)           │
//! └─────────┬──────────┘    └─────────┬──────────┘
//!           │ version / register / heartbeat
//!           ▼
//!     controller A                controller B
//! ```
//!
//! Every namespace fetch runs through [`version_policy::validate`] before the
//! actor is allowed to register.
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | `NodeConfig`, TOML + env loading, retry policy |
//! | [`controller_client`] | `ControllerClient` trait, HTTP client, scripted mock |
//! | [`error`] | `VersionError`, `TransportError`, `SessionError` |
//! | [`metrics`] | Per-session atomic counters, Prometheus export |
//! | [`session_actor`] | `WorkerSessionActor` run loop |
//! | [`session_group`] | `SessionGroup` trait, `NodeSessionGroup` |
//! | [`session_state`] | State machine and transition history |
//! | [`version_policy`] | Compatibility check of a namespace descriptor |

pub mod config;
pub mod controller_client;
pub mod error;
pub mod metrics;
pub mod session_actor;
pub mod session_group;
pub mod session_state;
pub mod version_policy;

pub use config::{ConfigError, ControllerEndpoint, NodeConfig, RetryPolicy, NODE_SOFTWARE_VERSION};
pub use controller_client::{ControllerClient, HttpControllerClient, MockControllerClient};
pub use error::{SessionError, TransportError, VersionError};
pub use metrics::{render_prometheus, SessionMetrics, SessionMetricsSnapshot};
pub use session_actor::{SessionExit, WorkerSessionActor};
pub use session_group::{ActorFailure, CommandBatch, NodeSessionGroup, SessionGroup};
pub use session_state::{SessionState, SessionStateTracker, StateTransition};
pub use version_policy::{validate, CompatibilityReport, LayoutCheck};
