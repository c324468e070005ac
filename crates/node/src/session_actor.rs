//! # Worker Session Actor
//!
//! Provides [`WorkerSessionActor`], which owns the connection lifecycle to
//! exactly one controller and guarantees the node never reaches the
//! heartbeat phase against a controller whose software version is below the
//! configured floor.
//!
//! ## Run Loop
//!
//! ```text
//! run()
//!  │
//!  ├─ Unregistered ──── retrieve_namespace_info() ──┬─ ok ───────────▶ NamespaceValidated
//!  │                                                ├─ fatal ────────▶ Failed (exit)
//!  │                                                └─ transport ────▶ backoff, retry
//!  │
//!  ├─ NamespaceValidated ── register() ─────────────┬─ ok ───────────▶ Registered ─▶ HeartbeatLoop
//!  │                                                ├─ rejected ─────▶ Failed (exit)
//!  │                                                └─ transport ────▶ backoff, retry
//!  │
//!  └─ HeartbeatLoop ── heartbeat() every interval ──┬─ ok ───────────▶ stay
//!                                                   ├─ reregister ───▶ Unregistered
//!                                                   ├─ new identity ─▶ Failed (exit)
//!                                                   └─ transport ────▶ backoff; once
//!                                                                      failures exceed
//!                                                                      the max ▶ Unregistered
//! ```
//!
//! `should_run()` is checked before every RPC and every backoff wait races
//! the group's `stopped()` signal, so shutdown latency is bounded by one RPC
//! timeout.
//!
//! ## Ownership
//!
//! The actor owns its client, state and last known namespace exclusively.
//! The client can be swapped with [`WorkerSessionActor::set_controller_client`]
//! only until `run()` starts. The only shared state is the read-only
//! [`NodeConfig`] and the group's liveness flag.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use keel_common::{
    HeartbeatResponse, LayoutVersion, NamespaceDescriptor, NodeIdentity, NodeStatusReport,
    RegistrationAck, EXPECTED_CONTROLLER_LAYOUT_VERSION,
};
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::controller_client::ControllerClient;
use crate::error::{SessionError, TransportError, VersionError};
use crate::metrics::SessionMetrics;
use crate::session_group::SessionGroup;
use crate::session_state::{SessionState, SessionStateTracker, StateTransition};
use crate::version_policy::{self, CompatibilityReport, LayoutCheck};

// ════════════════════════════════════════════════════════════════════════════════
// EXIT
// ════════════════════════════════════════════════════════════════════════════════

/// Why `run()` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// `should_run()` turned `false`. Not an error.
    Shutdown,
    /// The session hit a fatal error and entered `Failed`.
    Failed(SessionError),
}

enum Step {
    Continue,
    Exit(SessionExit),
}

// ════════════════════════════════════════════════════════════════════════════════
// ACTOR
// ════════════════════════════════════════════════════════════════════════════════

pub struct WorkerSessionActor {
    controller_id: String,
    config: Arc<NodeConfig>,
    expected_layout: LayoutVersion,
    client: Box<dyn ControllerClient>,
    group: Arc<dyn SessionGroup>,
    tracker: SessionStateTracker,
    last_known_namespace: Option<NamespaceDescriptor>,
    /// First namespace this actor accepted; later handshakes must match it.
    pinned_namespace: Option<NamespaceDescriptor>,
    last_compatibility: Option<CompatibilityReport>,
    registration: Option<RegistrationAck>,
    heartbeat_seq: u64,
    metrics: Arc<SessionMetrics>,
    /// Error that moved the session to `Failed`.
    failure: Option<SessionError>,
    started: bool,
}

impl WorkerSessionActor {
    pub fn new(
        controller_id: impl Into<String>,
        config: Arc<NodeConfig>,
        client: Box<dyn ControllerClient>,
        group: Arc<dyn SessionGroup>,
    ) -> Self {
        Self {
            controller_id: controller_id.into(),
            config,
            expected_layout: EXPECTED_CONTROLLER_LAYOUT_VERSION,
            client,
            group,
            tracker: SessionStateTracker::new(),
            last_known_namespace: None,
            pinned_namespace: None,
            last_compatibility: None,
            registration: None,
            heartbeat_seq: 0,
            metrics: Arc::new(SessionMetrics::new()),
            failure: None,
            started: false,
        }
    }

    /// Overrides the compiled-in expected controller layout.
    #[must_use]
    pub fn with_expected_layout(mut self, layout: LayoutVersion) -> Self {
        self.expected_layout = layout;
        self
    }

    /// Replaces the controller client.
    ///
    /// ## Errors
    ///
    /// [`SessionError::ActorStarted`] once `run()` has been entered.
    pub fn set_controller_client(
        &mut self,
        client: Box<dyn ControllerClient>,
    ) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::ActorStarted);
        }
        self.client = client;
        Ok(())
    }

    // ── accessors ──────────────────────────────────────────────────────

    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    pub fn state(&self) -> SessionState {
        self.tracker.current()
    }

    pub fn history(&self) -> &[StateTransition] {
        self.tracker.history()
    }

    pub fn last_known_namespace(&self) -> Option<&NamespaceDescriptor> {
        self.last_known_namespace.as_ref()
    }

    /// Findings of the most recent successful validation, including any
    /// tolerated layout mismatch.
    pub fn last_compatibility(&self) -> Option<&CompatibilityReport> {
        self.last_compatibility.as_ref()
    }

    pub fn registration(&self) -> Option<&RegistrationAck> {
        self.registration.as_ref()
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        self.metrics.clone()
    }

    /// The fatal error that ended the session, once in `Failed`.
    pub fn failure(&self) -> Option<&SessionError> {
        self.failure.as_ref()
    }

    // ════════════════════════════════════════════════════════════════════════
    // RPC OPERATIONS
    // ════════════════════════════════════════════════════════════════════════

    /// Fetches the controller's namespace descriptor and validates it.
    ///
    /// On success `last_known_namespace` is replaced with the returned
    /// descriptor. Version-policy errors are returned unchanged and are
    /// fatal; retrying immediately cannot change the outcome. Transport
    /// errors are retryable.
    pub async fn retrieve_namespace_info(&mut self) -> Result<NamespaceDescriptor, SessionError> {
        self.metrics.record_version_request();
        let descriptor = bounded(self.config.rpc_timeout, self.client.version_request()).await?;

        let report = version_policy::validate(&descriptor, &self.config, self.expected_layout)?;

        if let Some(pinned) = &self.pinned_namespace {
            if !pinned.same_namespace(&descriptor) {
                return Err(VersionError::NamespaceChanged {
                    accepted: pinned.identity_label(),
                    reported: descriptor.identity_label(),
                }
                .into());
            }
        }

        if report.version_differs {
            info!(
                controller = %self.controller_id,
                controller_version = %descriptor.software_version,
                node_version = %self.config.node_software_version,
                "reported controller version differs from node version"
            );
        }
        if let LayoutCheck::Mismatch { expected, reported, relation } = report.layout {
            self.metrics.record_layout_mismatch();
            warn!(
                controller = %self.controller_id,
                expected = %expected,
                reported = %reported,
                relation = %relation,
                "controller layout version differs from expected; continuing"
            );
        }

        if self.pinned_namespace.is_none() {
            self.pinned_namespace = Some(descriptor.clone());
        }
        self.last_compatibility = Some(report);
        self.last_known_namespace = Some(descriptor.clone());
        Ok(descriptor)
    }

    /// Registers this node. A refusal from the controller is fatal.
    pub async fn register(&mut self) -> Result<RegistrationAck, SessionError> {
        self.metrics.record_registration();
        let identity = NodeIdentity {
            node_id: self.config.node_id.clone(),
            node_addr: self.config.node_addr.clone(),
            software_version: self.config.node_software_version.clone(),
            capacity_gb: self.config.capacity_gb,
            meta: Default::default(),
        };

        let ack = bounded(self.config.rpc_timeout, self.client.register(&identity)).await?;
        if !ack.accepted {
            return Err(SessionError::RegistrationRejected {
                reason: ack
                    .reason
                    .clone()
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }

        self.heartbeat_seq = 0;
        self.registration = Some(ack.clone());
        Ok(ack)
    }

    /// Sends one heartbeat for the current registration.
    pub async fn send_heartbeat(&mut self) -> Result<HeartbeatResponse, SessionError> {
        self.metrics.record_heartbeat();
        self.heartbeat_seq = self.heartbeat_seq.saturating_add(1);
        let report = NodeStatusReport {
            node_id: self.config.node_id.clone(),
            registration_id: self
                .registration
                .as_ref()
                .map(|r| r.registration_id.clone())
                .unwrap_or_default(),
            sequence: self.heartbeat_seq,
            capacity_gb: self.config.capacity_gb,
            timestamp: unix_now(),
        };
        Ok(bounded(self.config.rpc_timeout, self.client.heartbeat(&report)).await?)
    }

    // ════════════════════════════════════════════════════════════════════════
    // RUN LOOP
    // ════════════════════════════════════════════════════════════════════════

    /// Drives the session until shutdown or a fatal error.
    ///
    /// Calling `run()` again on a failed actor issues no RPCs and returns
    /// the original failure.
    pub async fn run(&mut self) -> SessionExit {
        self.started = true;
        if let Some(e) = &self.failure {
            warn!(controller = %self.controller_id, "run() on a failed session: {}", e);
            return SessionExit::Failed(e.clone());
        }
        info!(controller = %self.controller_id, "session actor starting");

        let exit = loop {
            if !self.group.should_run() {
                break SessionExit::Shutdown;
            }
            let step = match self.state() {
                SessionState::Unregistered => self.handshake().await,
                SessionState::NamespaceValidated => self.registration_phase().await,
                SessionState::Registered => {
                    self.transition(SessionState::HeartbeatLoop, "registration acknowledged");
                    Step::Continue
                }
                SessionState::HeartbeatLoop => self.heartbeat_loop().await,
                SessionState::Failed => match self.failure.clone() {
                    Some(e) => Step::Exit(SessionExit::Failed(e)),
                    // only fail() enters Failed, and it always records the error
                    None => Step::Exit(SessionExit::Shutdown),
                },
            };
            if let Step::Exit(exit) = step {
                break exit;
            }
        };

        match &exit {
            SessionExit::Shutdown => {
                info!(controller = %self.controller_id, state = %self.state(), "session actor stopped")
            }
            SessionExit::Failed(e) => {
                error!(controller = %self.controller_id, "session actor terminated: {}", e)
            }
        }
        exit
    }

    async fn handshake(&mut self) -> Step {
        let mut attempt = 0u32;
        loop {
            if !self.group.should_run() {
                return Step::Exit(SessionExit::Shutdown);
            }
            match self.retrieve_namespace_info().await {
                Ok(ns) => {
                    self.transition(
                        SessionState::NamespaceValidated,
                        format!("namespace accepted: {}", ns),
                    );
                    return Step::Continue;
                }
                Err(e) if e.is_fatal() => return self.fail(e),
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    if !self.backoff(attempt, "namespace fetch", &e).await {
                        return Step::Exit(SessionExit::Shutdown);
                    }
                }
            }
        }
    }

    async fn registration_phase(&mut self) -> Step {
        let mut attempt = 0u32;
        loop {
            if !self.group.should_run() {
                return Step::Exit(SessionExit::Shutdown);
            }
            match self.register().await {
                Ok(ack) => {
                    self.transition(
                        SessionState::Registered,
                        format!("registration {}", ack.registration_id),
                    );
                    return Step::Continue;
                }
                Err(e) if e.is_fatal() => return self.fail(e),
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    if !self.backoff(attempt, "registration", &e).await {
                        return Step::Exit(SessionExit::Shutdown);
                    }
                }
            }
        }
    }

    async fn heartbeat_loop(&mut self) -> Step {
        let mut consecutive_failures = 0u32;
        // First heartbeat goes out immediately after registration.
        let mut wait = Duration::ZERO;

        loop {
            if !wait.is_zero() && !self.pause(wait).await {
                return Step::Exit(SessionExit::Shutdown);
            }
            if !self.group.should_run() {
                return Step::Exit(SessionExit::Shutdown);
            }

            match self.send_heartbeat().await {
                Ok(resp) => {
                    if let Err(e) = self.check_controller_identity(&resp) {
                        return self.fail(e);
                    }
                    consecutive_failures = 0;
                    wait = self.config.heartbeat_interval;
                    if !resp.commands.is_empty() {
                        debug!(
                            controller = %self.controller_id,
                            count = resp.commands.len(),
                            "forwarding controller commands"
                        );
                        self.group.on_commands(&self.controller_id, resp.commands);
                    }
                    if resp.reregister {
                        self.reset_handshake("controller requested re-registration");
                        return Step::Continue;
                    }
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    self.metrics.record_heartbeat_failure();
                    if consecutive_failures > self.config.max_heartbeat_failures {
                        warn!(
                            controller = %self.controller_id,
                            failures = consecutive_failures,
                            "heartbeat failure threshold exceeded: {}",
                            e
                        );
                        self.reset_handshake("heartbeat failure threshold exceeded");
                        return Step::Continue;
                    }
                    wait = self.config.retry.delay_for(consecutive_failures);
                    self.metrics.record_transport_retry();
                    warn!(
                        controller = %self.controller_id,
                        attempt = consecutive_failures,
                        backoff_ms = wait.as_millis() as u64,
                        "heartbeat failed, retrying: {}",
                        e
                    );
                }
            }
        }
    }

    // ── helpers ────────────────────────────────────────────────────────

    /// Compares the versions a heartbeat reply carries against the pair
    /// accepted at handshake. Absent fields are not compared.
    fn check_controller_identity(&self, resp: &HeartbeatResponse) -> Result<(), SessionError> {
        let Some(accepted) = &self.last_known_namespace else {
            return Ok(());
        };
        let software_changed = resp
            .software_version
            .as_ref()
            .is_some_and(|v| *v != accepted.software_version);
        let layout_changed = resp
            .layout_version
            .is_some_and(|l| l != accepted.layout_version);
        if !software_changed && !layout_changed {
            return Ok(());
        }

        let reported_sv = resp
            .software_version
            .as_ref()
            .unwrap_or(&accepted.software_version);
        let reported_layout = resp.layout_version.unwrap_or(accepted.layout_version);
        Err(SessionError::ControllerIdentityChanged {
            accepted: format!("{}/{}", accepted.software_version, accepted.layout_version),
            reported: format!("{}/{}", reported_sv, reported_layout),
        })
    }

    /// Logs a retryable failure and waits out the backoff. Returns `false`
    /// if the node started shutting down meanwhile.
    async fn backoff(&mut self, attempt: u32, what: &str, err: &SessionError) -> bool {
        let delay = self.config.retry.delay_for(attempt);
        self.metrics.record_transport_retry();
        warn!(
            controller = %self.controller_id,
            state = %self.state(),
            attempt,
            backoff_ms = delay.as_millis() as u64,
            "{} failed, retrying: {}",
            what,
            err
        );
        self.pause(delay).await
    }

    /// Sleeps for `delay` unless the group stops first. Returns `false` if
    /// the actor should exit.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.group.stopped() => {}
        }
        self.group.should_run()
    }

    fn reset_handshake(&mut self, reason: &str) {
        self.metrics.record_handshake_reset();
        self.registration = None;
        self.transition(SessionState::Unregistered, reason);
    }

    fn fail(&mut self, e: SessionError) -> Step {
        self.failure = Some(e.clone());
        self.transition(SessionState::Failed, e.to_string());
        self.group.on_actor_failed(&self.controller_id, &e);
        Step::Exit(SessionExit::Failed(e))
    }

    fn transition(&mut self, next: SessionState, reason: impl Into<String>) {
        let reason = reason.into();
        let from = self.tracker.current();
        match self.tracker.advance(next, reason.clone()) {
            Ok(()) => info!(
                controller = %self.controller_id,
                from = %from,
                to = %next,
                "{}",
                reason
            ),
            Err(msg) => error!(controller = %self.controller_id, "{}", msg),
        }
    }
}

impl std::fmt::Debug for WorkerSessionActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSessionActor")
            .field("controller_id", &self.controller_id)
            .field("state", &self.tracker.current())
            .field("expected_layout", &self.expected_layout)
            .field("last_known_namespace", &self.last_known_namespace)
            .field("started", &self.started)
            .field("client", &"[dyn ControllerClient]")
            .finish()
    }
}

/// Bounds one RPC by `timeout`.
async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::controller_client::MockControllerClient;
    use crate::session_group::NodeSessionGroup;
    use keel_common::SoftwareVersion;

    const NODE_VERSION: &str = "3.4.0";

    fn make_config() -> Arc<NodeConfig> {
        Arc::new(NodeConfig {
            node_id: "dn-test".into(),
            node_software_version: SoftwareVersion::new(NODE_VERSION),
            minimum_controller_version: SoftwareVersion::new(NODE_VERSION),
            heartbeat_interval: Duration::from_millis(5),
            rpc_timeout: Duration::from_millis(200),
            max_heartbeat_failures: 3,
            retry: RetryPolicy::fixed(Duration::from_millis(5)),
            ..NodeConfig::default()
        })
    }

    fn make_descriptor() -> NamespaceDescriptor {
        NamespaceDescriptor::new(
            NODE_VERSION,
            EXPECTED_CONTROLLER_LAYOUT_VERSION,
            1001,
            "CID-test",
            "BP-test",
        )
    }

    fn make_actor(mock: &MockControllerClient) -> (WorkerSessionActor, Arc<NodeSessionGroup>) {
        let group = NodeSessionGroup::new();
        let actor = WorkerSessionActor::new(
            "ctrl-test",
            make_config(),
            Box::new(mock.clone()),
            group.clone(),
        );
        (actor, group)
    }

    // ──────────────────────────────────────────────────────────────────
    // RETRIEVE NAMESPACE INFO
    // ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn retrieve_updates_last_known_namespace() {
        let mock = MockControllerClient::new(make_descriptor());
        let (mut actor, _group) = make_actor(&mock);
        assert!(actor.last_known_namespace().is_none());

        let got = actor.retrieve_namespace_info().await;
        assert_eq!(got.as_ref().ok(), Some(&make_descriptor()));
        assert_eq!(actor.last_known_namespace(), Some(&make_descriptor()));
        assert_eq!(
            actor.last_compatibility().map(|r| r.layout),
            Some(LayoutCheck::Match)
        );
        // retrieve alone never moves the state machine
        assert_eq!(actor.state(), SessionState::Unregistered);
    }

    #[tokio::test]
    async fn retrieve_transport_error_keeps_previous_namespace() {
        let mock = MockControllerClient::new(make_descriptor());
        let (mut actor, _group) = make_actor(&mock);
        assert!(actor.retrieve_namespace_info().await.is_ok());

        mock.push_version(Err(TransportError::Unreachable("refused".into())));
        let res = actor.retrieve_namespace_info().await;
        assert!(matches!(res, Err(ref e) if e.is_retryable()));
        assert_eq!(actor.last_known_namespace(), Some(&make_descriptor()));
    }

    #[tokio::test]
    async fn retrieve_times_out() {
        let mock = MockControllerClient::new(make_descriptor());
        mock.set_delay(Some(Duration::from_secs(5)));
        let (mut actor, _group) = make_actor(&mock);

        let res = actor.retrieve_namespace_info().await;
        assert_eq!(
            res,
            Err(SessionError::Transport(TransportError::Timeout { after_ms: 200 }))
        );
    }

    #[tokio::test]
    async fn retrieve_rejects_changed_namespace() {
        let mock = MockControllerClient::new(make_descriptor());
        let (mut actor, _group) = make_actor(&mock);
        assert!(actor.retrieve_namespace_info().await.is_ok());

        let mut other = make_descriptor();
        other.cluster_id = "CID-other".into();
        mock.set_descriptor(other);

        let res = actor.retrieve_namespace_info().await;
        assert!(matches!(
            res,
            Err(SessionError::Version(VersionError::NamespaceChanged { .. }))
        ));
        assert_eq!(actor.last_known_namespace(), Some(&make_descriptor()));
    }

    // ──────────────────────────────────────────────────────────────────
    // REGISTER / HEARTBEAT
    // ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn register_sends_identity() {
        let mock = MockControllerClient::new(make_descriptor());
        let (mut actor, _group) = make_actor(&mock);

        let ack = actor.register().await;
        assert!(matches!(ack, Ok(ref a) if a.accepted));
        let sent = mock.registrations();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].node_id, "dn-test");
        assert_eq!(sent[0].software_version.as_str(), NODE_VERSION);
    }

    #[tokio::test]
    async fn register_rejection_is_fatal() {
        let mock = MockControllerClient::new(make_descriptor());
        mock.push_register(Ok(RegistrationAck::rejected("node is decommissioned")));
        let (mut actor, _group) = make_actor(&mock);

        let res = actor.register().await;
        match res {
            Err(e @ SessionError::RegistrationRejected { .. }) => {
                assert!(e.is_fatal());
                assert!(e.to_string().contains("decommissioned"));
            }
            other => panic!("expected RegistrationRejected, got {:?}", other),
        }
        assert!(actor.registration().is_none());
    }

    #[tokio::test]
    async fn heartbeat_sequence_increments_and_resets_on_register() {
        let mock = MockControllerClient::new(make_descriptor());
        let (mut actor, _group) = make_actor(&mock);

        assert!(actor.register().await.is_ok());
        assert!(actor.send_heartbeat().await.is_ok());
        assert!(actor.send_heartbeat().await.is_ok());
        assert!(actor.register().await.is_ok());
        assert!(actor.send_heartbeat().await.is_ok());

        let seqs: Vec<u64> = mock.reports().iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 1]);
        assert_eq!(mock.reports()[2].registration_id, "reg-2");
    }

    // ──────────────────────────────────────────────────────────────────
    // CLIENT INJECTION
    // ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn client_swap_only_before_start() {
        let first = MockControllerClient::new(make_descriptor());
        let second = MockControllerClient::new(make_descriptor());
        let (mut actor, group) = make_actor(&first);

        assert!(actor.set_controller_client(Box::new(second.clone())).is_ok());
        assert!(actor.retrieve_namespace_info().await.is_ok());
        assert_eq!(first.version_calls(), 0);
        assert_eq!(second.version_calls(), 1);

        group.shutdown();
        assert_eq!(actor.run().await, SessionExit::Shutdown);
        assert_eq!(
            actor.set_controller_client(Box::new(first.clone())),
            Err(SessionError::ActorStarted)
        );
    }

    #[tokio::test]
    async fn run_exits_immediately_when_group_stopped() {
        let mock = MockControllerClient::new(make_descriptor());
        let (mut actor, group) = make_actor(&mock);
        group.shutdown();

        assert_eq!(actor.run().await, SessionExit::Shutdown);
        assert_eq!(mock.total_calls(), 0);
    }

    // ──────────────────────────────────────────────────────────────────
    // FAILED SESSIONS
    // ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn rerun_after_failure_returns_original_error() {
        let mock = MockControllerClient::new(make_descriptor());
        mock.push_register(Ok(RegistrationAck::rejected("banned")));
        let (mut actor, group) = make_actor(&mock);

        let first = actor.run().await;
        assert!(matches!(first, SessionExit::Failed(SessionError::RegistrationRejected { .. })));
        let calls = mock.total_calls();

        let second = actor.run().await;
        assert_eq!(second, first);
        assert_eq!(mock.total_calls(), calls);
        assert_eq!(group.failures().len(), 1);
        assert_eq!(actor.state(), SessionState::Failed);
        assert!(matches!(
            actor.failure(),
            Some(SessionError::RegistrationRejected { .. })
        ));
    }

    #[tokio::test]
    async fn heartbeat_identity_change_is_fatal() {
        let mock = MockControllerClient::new(make_descriptor());
        mock.push_heartbeat(Ok(
            HeartbeatResponse::ok().with_versions(NODE_VERSION, EXPECTED_CONTROLLER_LAYOUT_VERSION)
        ));
        mock.push_heartbeat(Ok(
            HeartbeatResponse::ok().with_versions("3.5.0", EXPECTED_CONTROLLER_LAYOUT_VERSION)
        ));
        let (mut actor, group) = make_actor(&mock);

        let exit = actor.run().await;
        match exit {
            SessionExit::Failed(SessionError::ControllerIdentityChanged { accepted, reported }) => {
                assert!(accepted.starts_with("3.4.0/"));
                assert!(reported.starts_with("3.5.0/"));
            }
            other => panic!("expected ControllerIdentityChanged, got {:?}", other),
        }
        assert_eq!(mock.heartbeat_calls(), 2);
        // not re-validated through the handshake
        assert_eq!(mock.version_calls(), 1);
        assert_eq!(group.failures().len(), 1);
        assert_eq!(
            actor.history().last().map(|t| (t.from, t.to)),
            Some((SessionState::HeartbeatLoop, SessionState::Failed))
        );
    }

    #[tokio::test]
    async fn heartbeat_without_versions_is_not_compared() {
        let mock = MockControllerClient::new(make_descriptor());
        let (mut actor, _group) = make_actor(&mock);
        assert!(actor.retrieve_namespace_info().await.is_ok());

        assert!(actor.check_controller_identity(&HeartbeatResponse::ok()).is_ok());
        let layout_only = HeartbeatResponse {
            layout_version: Some(LayoutVersion(-67)),
            ..HeartbeatResponse::ok()
        };
        assert!(matches!(
            actor.check_controller_identity(&layout_only),
            Err(SessionError::ControllerIdentityChanged { .. })
        ));
    }
}
