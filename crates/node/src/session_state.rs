//! # Session State Machine
//!
//! Provides [`SessionState`] and [`SessionStateTracker`], the per-controller
//! session lifecycle as seen by a worker.
//!
//! ```text
//!                 fetch + validate ok            register ok
//! ┌──────────────┐ ───────────────▶ ┌────────────────────┐ ─────────▶ ┌────────────┐
//! │ Unregistered │                  │ NamespaceValidated │            │ Registered │
//! └──────┬───────┘                  └─────────┬──────────┘            └─────┬──────┘
//!    ▲   │ incompatible                       │ rejected                    │ immediate
//!    │   ▼                                    ▼                             ▼
//!    │ ┌────────┐ ◀──────────────────────────────                    ┌───────────────┐
//!    │ │ Failed │  (terminal)                                        │ HeartbeatLoop │
//!    │ └────────┘ ◀──────── controller identity changed ──────────── └───────┬───────┘
//!    │                                                                       │
//!    └────────────── failure threshold exceeded / re-register requested ─────┘
//! ```
//!
//! Transport retries never change state, so they never appear here.
//!
//! ## Invariants
//!
//! - `current` always equals the `to` field of the last transition in
//!   `history` (or `Unregistered` if history is empty).
//! - `Failed` is terminal: no transition leaves it.

use std::fmt;

// ════════════════════════════════════════════════════════════════════════════════
// SESSION STATE
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unregistered,
    NamespaceValidated,
    Registered,
    HeartbeatLoop,
    Failed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Unregistered, NamespaceValidated)
                | (Unregistered, Failed)
                | (NamespaceValidated, Registered)
                | (NamespaceValidated, Failed)
                | (Registered, HeartbeatLoop)
                | (HeartbeatLoop, Unregistered)
                | (HeartbeatLoop, Failed)
        )
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        self == SessionState::Failed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "unregistered",
            Self::NamespaceValidated => "namespace_validated",
            Self::Registered => "registered",
            Self::HeartbeatLoop => "heartbeat_loop",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub reason: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// TRACKER
// ════════════════════════════════════════════════════════════════════════════════

/// Current session state plus ordered transition history (oldest first).
pub struct SessionStateTracker {
    current: SessionState,
    history: Vec<StateTransition>,
}

impl SessionStateTracker {
    pub fn new() -> Self {
        Self {
            current: SessionState::Unregistered,
            history: Vec::new(),
        }
    }

    /// Moves to `next` if the transition is legal.
    ///
    /// ## Errors
    ///
    /// Returns `Err(String)` describing the illegal transition; state is
    /// left unchanged.
    pub fn advance(&mut self, next: SessionState, reason: impl Into<String>) -> Result<(), String> {
        if !self.current.can_transition_to(next) {
            return Err(format!(
                "illegal session transition: {} -> {}",
                self.current, next
            ));
        }
        self.history.push(StateTransition {
            from: self.current,
            to: next,
            reason: reason.into(),
        });
        self.current = next;
        Ok(())
    }

    #[inline]
    pub fn current(&self) -> SessionState {
        self.current
    }

    #[inline]
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Number of times the session fell back from the heartbeat loop to a
    /// fresh handshake.
    pub fn handshake_resets(&self) -> usize {
        self.history
            .iter()
            .filter(|t| t.from == SessionState::HeartbeatLoop && t.to == SessionState::Unregistered)
            .count()
    }
}

impl Default for SessionStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionStateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStateTracker")
            .field("current", &self.current)
            .field("history_len", &self.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_starts_unregistered() {
        let t = SessionStateTracker::new();
        assert_eq!(t.current(), Unregistered);
        assert!(t.history().is_empty());
    }

    #[test]
    fn test_full_happy_path() {
        let mut t = SessionStateTracker::new();
        assert!(t.advance(NamespaceValidated, "fetched").is_ok());
        assert!(t.advance(Registered, "ack").is_ok());
        assert!(t.advance(HeartbeatLoop, "start").is_ok());
        assert!(t.advance(Unregistered, "threshold").is_ok());
        assert_eq!(t.current(), Unregistered);
        assert_eq!(t.history().len(), 4);
        assert_eq!(t.handshake_resets(), 1);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut t = SessionStateTracker::new();
        let res = t.advance(HeartbeatLoop, "skip");
        assert!(res.is_err());
        assert_eq!(t.current(), Unregistered);
        assert!(t.history().is_empty());
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut t = SessionStateTracker::new();
        assert!(t.advance(Failed, "incompatible").is_ok());
        for next in [Unregistered, NamespaceValidated, Registered, HeartbeatLoop, Failed] {
            assert!(t.advance(next, "x").is_err());
        }
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_heartbeat_loop_exits() {
        assert!(HeartbeatLoop.can_transition_to(Unregistered));
        assert!(HeartbeatLoop.can_transition_to(Failed));
        assert!(!HeartbeatLoop.can_transition_to(Registered));
        assert!(!HeartbeatLoop.can_transition_to(NamespaceValidated));
    }

    #[test]
    fn test_registered_only_to_heartbeat() {
        for next in [Unregistered, NamespaceValidated, Registered, Failed] {
            assert!(!Registered.can_transition_to(next));
        }
        assert!(Registered.can_transition_to(HeartbeatLoop));
    }
}
