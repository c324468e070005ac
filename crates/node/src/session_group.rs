//! # Session Group
//!
//! The owner of a node's session actors, one per controller endpoint.
//!
//! ## Contract consumed by the actors
//!
//! | Method | Semantics |
//! |--------|-----------|
//! | `should_run()` | Process-wide liveness flag. Polled, never blocks. |
//! | `stopped()` | Resolves once `should_run()` is `false`; lets backoff waits end early. |
//! | `on_actor_failed()` | Sink for fatal session failures. Cluster policy lives here. |
//! | `on_commands()` | Sink for heartbeat commands. Interpreting them is not the session's job. |
//!
//! ## Concurrency
//!
//! `should_run` is an `AtomicBool` written only by [`NodeSessionGroup::shutdown`]
//! and read by every actor. Wakeups go through a `watch` channel so an actor
//! sleeping in backoff sees shutdown immediately. Failure and task lists use
//! `parking_lot::Mutex`, never held across an `.await`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_common::ControllerCommand;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::SessionError;
use crate::metrics::{render_prometheus, SessionMetrics};
use crate::session_actor::{SessionExit, WorkerSessionActor};

/// Poll interval of the default [`SessionGroup::stopped`] implementation.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ════════════════════════════════════════════════════════════════════════════════
// TRAIT
// ════════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait SessionGroup: Send + Sync {
    /// `false` once the node is shutting down.
    fn should_run(&self) -> bool;

    /// Called exactly once when an actor enters `Failed`.
    fn on_actor_failed(&self, controller_id: &str, error: &SessionError);

    /// Receives commands returned by a heartbeat. Ignored by default.
    fn on_commands(&self, _controller_id: &str, _commands: Vec<ControllerCommand>) {}

    /// Resolves once `should_run()` turns `false`.
    async fn stopped(&self) {
        while self.should_run() {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// NODE SESSION GROUP
// ════════════════════════════════════════════════════════════════════════════════

/// A fatal failure reported by one actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorFailure {
    pub controller_id: String,
    pub error: SessionError,
}

/// Commands received from one controller in one heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandBatch {
    pub controller_id: String,
    pub commands: Vec<ControllerCommand>,
}

/// Default [`SessionGroup`]: shutdown flag, failure sink, command channel
/// and task bookkeeping for every actor of the node.
pub struct NodeSessionGroup {
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    failures: Mutex<Vec<ActorFailure>>,
    command_tx: mpsc::UnboundedSender<CommandBatch>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<CommandBatch>>>,
    tasks: Mutex<Vec<JoinHandle<(String, SessionExit)>>>,
    metrics: Mutex<Vec<(String, Arc<SessionMetrics>)>>,
}

impl NodeSessionGroup {
    pub fn new() -> Arc<Self> {
        let (stop_tx, _) = watch::channel(true);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            running: AtomicBool::new(true),
            stop_tx,
            failures: Mutex::new(Vec::new()),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            tasks: Mutex::new(Vec::new()),
            metrics: Mutex::new(Vec::new()),
        })
    }

    /// Flips `should_run` to `false` and wakes every waiting actor.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("session group shutting down");
        }
        self.stop_tx.send_replace(false);
    }

    /// Runs `actor` on its own task. Its metrics stay readable through
    /// [`NodeSessionGroup::metrics`].
    pub fn spawn_actor(&self, mut actor: WorkerSessionActor) {
        self.metrics
            .lock()
            .push((actor.controller_id().to_string(), actor.metrics()));
        let handle = tokio::spawn(async move {
            let exit = actor.run().await;
            (actor.controller_id().to_string(), exit)
        });
        self.tasks.lock().push(handle);
    }

    /// Waits for every spawned actor to exit.
    ///
    /// Actors whose task panicked are omitted from the result.
    pub async fn join_all(&self) -> Vec<(String, SessionExit)> {
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        let mut out = Vec::with_capacity(handles.len());
        for h in handles {
            match h.await {
                Ok(r) => out.push(r),
                Err(e) => error!("session actor task aborted: {}", e),
            }
        }
        out
    }

    /// Fatal failures reported so far, oldest first.
    pub fn failures(&self) -> Vec<ActorFailure> {
        self.failures.lock().clone()
    }

    /// `true` if every controller in `total` has failed.
    pub fn all_failed(&self, total: usize) -> bool {
        total > 0 && self.failures.lock().len() >= total
    }

    /// Metrics handles of every spawned actor, in spawn order.
    pub fn metrics(&self) -> Vec<(String, Arc<SessionMetrics>)> {
        self.metrics.lock().clone()
    }

    /// Prometheus text for every spawned actor, labelled by controller.
    pub fn to_prometheus(&self) -> String {
        let sessions = self.metrics.lock().clone();
        render_prometheus(sessions.iter().map(|(c, m)| (c.as_str(), m.as_ref())))
    }

    /// Takes the receiving end of the command channel. Only the first call
    /// returns `Some`.
    pub fn take_command_receiver(&self) -> Option<mpsc::UnboundedReceiver<CommandBatch>> {
        self.command_rx.lock().take()
    }
}

#[async_trait]
impl SessionGroup for NodeSessionGroup {
    fn should_run(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn on_actor_failed(&self, controller_id: &str, error: &SessionError) {
        error!(controller = %controller_id, "session actor failed: {}", error);
        self.failures.lock().push(ActorFailure {
            controller_id: controller_id.to_string(),
            error: error.clone(),
        });
    }

    fn on_commands(&self, controller_id: &str, commands: Vec<ControllerCommand>) {
        // Receiver may be gone if nobody consumes commands; that is fine.
        let _ = self.command_tx.send(CommandBatch {
            controller_id: controller_id.to_string(),
            commands,
        });
    }

    async fn stopped(&self) {
        let mut rx = self.stop_tx.subscribe();
        loop {
            let running = *rx.borrow_and_update();
            if !running || !self.should_run() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[tokio::test]
    async fn test_shutdown_flips_flag_and_wakes() {
        let group = NodeSessionGroup::new();
        assert!(group.should_run());

        let g = group.clone();
        let waiter = tokio::spawn(async move { g.stopped().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        group.shutdown();

        let res = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(res.is_ok(), "stopped() did not resolve after shutdown");
        assert!(!group.should_run());
    }

    #[tokio::test]
    async fn test_stopped_after_shutdown_returns_immediately() {
        let group = NodeSessionGroup::new();
        group.shutdown();
        let res = tokio::time::timeout(Duration::from_millis(100), group.stopped()).await;
        assert!(res.is_ok());
    }

    #[test]
    fn test_failures_recorded() {
        let group = NodeSessionGroup::new();
        let err = SessionError::RegistrationRejected {
            reason: "decommissioned".into(),
        };
        group.on_actor_failed("ctrl-a", &err);
        assert_eq!(
            group.failures(),
            vec![ActorFailure {
                controller_id: "ctrl-a".into(),
                error: err,
            }]
        );
        assert!(!group.all_failed(2));
        group.on_actor_failed("ctrl-b", &SessionError::from(TransportError::Timeout { after_ms: 1 }));
        assert!(group.all_failed(2));
    }

    #[tokio::test]
    async fn test_commands_forwarded() {
        let group = NodeSessionGroup::new();
        let mut rx = group.take_command_receiver().expect("receiver");
        assert!(group.take_command_receiver().is_none());

        group.on_commands(
            "ctrl-a",
            vec![ControllerCommand {
                kind: "finalize".into(),
                payload: serde_json::Value::Null,
            }],
        );
        let batch = rx.recv().await.expect("batch");
        assert_eq!(batch.controller_id, "ctrl-a");
        assert_eq!(batch.commands[0].kind, "finalize");
    }

    struct PollingGroup {
        running: AtomicBool,
    }

    #[async_trait]
    impl SessionGroup for PollingGroup {
        fn should_run(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
        fn on_actor_failed(&self, _controller_id: &str, _error: &SessionError) {}
    }

    #[tokio::test]
    async fn test_default_stopped_polls() {
        let group = Arc::new(PollingGroup {
            running: AtomicBool::new(true),
        });
        let g = group.clone();
        let waiter = tokio::spawn(async move { g.stopped().await });
        group.running.store(false, Ordering::SeqCst);
        let res = tokio::time::timeout(STOP_POLL_INTERVAL * 10, waiter).await;
        assert!(res.is_ok());
    }
}
