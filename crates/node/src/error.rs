//! # Session Error Taxonomy
//!
//! | Error | Kind | Handling |
//! |-------|------|----------|
//! | [`VersionError::IncompatibleSoftwareVersion`] | fatal | actor → `Failed`, reported to group |
//! | [`VersionError::NamespaceChanged`] | fatal | actor → `Failed`, reported to group |
//! | [`SessionError::RegistrationRejected`] | fatal | actor → `Failed`, reported to group |
//! | [`SessionError::ControllerIdentityChanged`] | fatal | actor → `Failed`, reported to group |
//! | [`TransportError`] (any) | retryable | bounded backoff, state unchanged |
//! | [`SessionError::ActorStarted`] | misuse | returned to the caller, loop unaffected |
//!
//! A layout version mismatch is not an error; see
//! [`crate::version_policy::LayoutCheck`].
//!
//! Shutdown is not an error either: `run()` returns
//! [`crate::session_actor::SessionExit::Shutdown`].

use thiserror::Error;

// ════════════════════════════════════════════════════════════════════════════════
// VERSION POLICY ERRORS
// ════════════════════════════════════════════════════════════════════════════════

/// Namespace-level incompatibility detected during the handshake.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    /// Controller software version is below the configured floor.
    #[error(
        "The reported controller version is too low to communicate with this node. \
         Controller version: '{reported}'. Minimum controller version: '{minimum}'"
    )]
    IncompatibleSoftwareVersion { reported: String, minimum: String },

    /// The controller now reports a different namespace than the one this
    /// session already accepted.
    #[error("Controller namespace changed: accepted [{accepted}], reported [{reported}]")]
    NamespaceChanged { accepted: String, reported: String },
}

// ════════════════════════════════════════════════════════════════════════════════
// TRANSPORT ERRORS
// ════════════════════════════════════════════════════════════════════════════════

/// Failure to complete an RPC. Always retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset, ...
    #[error("controller unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete within the RPC timeout.
    #[error("controller call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The controller answered with a non-success status.
    #[error("controller returned status {status}: {body}")]
    Server { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("malformed controller response: {0}")]
    Decode(String),
}

// ════════════════════════════════════════════════════════════════════════════════
// SESSION ERRORS
// ════════════════════════════════════════════════════════════════════════════════

/// Any error a session operation can return.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The controller explicitly refused to admit this node.
    #[error("registration rejected by controller: {reason}")]
    RegistrationRejected { reason: String },

    /// A heartbeat reply reported a `(software, layout)` pair other than the
    /// one accepted at handshake.
    #[error("controller identity changed during heartbeats: accepted [{accepted}], reported [{reported}]")]
    ControllerIdentityChanged { accepted: String, reported: String },

    /// The controller client can only be replaced before `run()` starts.
    #[error("session actor already started; controller client cannot be replaced")]
    ActorStarted,
}

impl SessionError {
    /// Errors that end this actor's session for good.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Version(_)
                | Self::RegistrationRejected { .. }
                | Self::ControllerIdentityChanged { .. }
        )
    }

    /// Errors that are absorbed by the retry loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_message_contains_both_versions() {
        let e = VersionError::IncompatibleSoftwareVersion {
            reported: "3.0.0".into(),
            minimum: "4.0.0".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("reported controller version is too low"), "msg: {}", msg);
        assert!(msg.contains("3.0.0"));
        assert!(msg.contains("4.0.0"));
    }

    #[test]
    fn test_classification() {
        let fatal: SessionError = VersionError::IncompatibleSoftwareVersion {
            reported: "1".into(),
            minimum: "2".into(),
        }
        .into();
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());

        let rejected = SessionError::RegistrationRejected { reason: "no".into() };
        assert!(rejected.is_fatal());

        let changed = SessionError::ControllerIdentityChanged {
            accepted: "3.4.0/-66".into(),
            reported: "3.5.0/-67".into(),
        };
        assert!(changed.is_fatal());
        assert!(!matches!(changed, SessionError::Version(_)));

        let transient: SessionError = TransportError::Timeout { after_ms: 10 }.into();
        assert!(transient.is_retryable());
        assert!(!transient.is_fatal());

        assert!(!SessionError::ActorStarted.is_fatal());
        assert!(!SessionError::ActorStarted.is_retryable());
    }

    #[test]
    fn test_transparent_display() {
        let e: SessionError = TransportError::Unreachable("connection refused".into()).into();
        assert_eq!(e.to_string(), "controller unreachable: connection refused");
    }
}
