//! # Controller Client
//!
//! Trait-abstracted RPC stub for one controller endpoint.
//!
//! ## Architecture
//!
//! ```text
//! WorkerSessionActor
//!      │
//!      └─ Box<dyn ControllerClient>
//!            ├─ HttpControllerClient   (JSON over HTTP, reqwest)
//!            └─ MockControllerClient   (scripted, no network)
//! ```
//!
//! ## Contract
//!
//! - Implementations MUST NOT retry internally. Retry belongs to the actor.
//! - Implementations MUST NOT panic.
//! - Every failure to complete a call is a [`TransportError`]; a controller
//!   refusing a registration is a successful call returning
//!   `RegistrationAck { accepted: false, .. }`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_common::{
    HeartbeatResponse, NamespaceDescriptor, NodeIdentity, NodeStatusReport, RegistrationAck,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::error::TransportError;

// ════════════════════════════════════════════════════════════════════════════════
// TRAIT
// ════════════════════════════════════════════════════════════════════════════════

/// RPC surface of a controller, as consumed by the session actor.
#[async_trait]
pub trait ControllerClient: Send + Sync {
    /// Fetches the controller's namespace descriptor.
    async fn version_request(&self) -> Result<NamespaceDescriptor, TransportError>;

    /// Registers this node with the controller.
    async fn register(&self, identity: &NodeIdentity) -> Result<RegistrationAck, TransportError>;

    /// Sends one liveness report.
    async fn heartbeat(
        &self,
        status: &NodeStatusReport,
    ) -> Result<HeartbeatResponse, TransportError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// HTTP CLIENT
// ════════════════════════════════════════════════════════════════════════════════

/// JSON-over-HTTP controller client.
///
/// | Call | Request |
/// |------|---------|
/// | `version_request` | `GET {base}/v1/version` |
/// | `register` | `POST {base}/v1/register` |
/// | `heartbeat` | `POST {base}/v1/heartbeat` |
#[derive(Clone)]
pub struct HttpControllerClient {
    base: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpControllerClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(format!("client init: {}", e)))?;
        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self {
            base,
            timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn map_err(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            }
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Unreachable(e.to_string())
        }
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Server {
                status: status.as_u16(),
                body: server_body(resp.text().await),
            });
        }
        resp.json::<T>().await.map_err(|e| self.map_err(e))
    }
}

/// Body text of an error response, or a marker saying why it was unreadable.
fn server_body<E: std::fmt::Display>(read: Result<String, E>) -> String {
    match read {
        Ok(body) => body,
        Err(e) => format!("<unreadable body: {}>", e),
    }
}

#[async_trait]
impl ControllerClient for HttpControllerClient {
    async fn version_request(&self) -> Result<NamespaceDescriptor, TransportError> {
        let url = format!("{}/v1/version", self.base);
        let resp = self.client.get(&url).send().await.map_err(|e| self.map_err(e))?;
        self.decode(resp).await
    }

    async fn register(&self, identity: &NodeIdentity) -> Result<RegistrationAck, TransportError> {
        let url = format!("{}/v1/register", self.base);
        let resp = self
            .client
            .post(&url)
            .json(identity)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        self.decode(resp).await
    }

    async fn heartbeat(
        &self,
        status: &NodeStatusReport,
    ) -> Result<HeartbeatResponse, TransportError> {
        let url = format!("{}/v1/heartbeat", self.base);
        let resp = self
            .client
            .post(&url)
            .json(status)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        self.decode(resp).await
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MOCK CLIENT
// ════════════════════════════════════════════════════════════════════════════════

/// Scripted controller for tests.
///
/// Each call kind has its own FIFO queue of scripted results. When a queue
/// is empty the call returns the configured default (`Ok` with the stored
/// descriptor / an accepted ack / an empty heartbeat response), so a test only
/// scripts the interesting prefix of a session.
///
/// Clones share state, so a test can keep one handle while the actor owns
/// another. Locks are never held across an `.await`.
#[derive(Clone)]
pub struct MockControllerClient {
    inner: Arc<MockInner>,
}

struct MockInner {
    descriptor: Mutex<NamespaceDescriptor>,
    version_script: Mutex<VecDeque<Result<NamespaceDescriptor, TransportError>>>,
    register_script: Mutex<VecDeque<Result<RegistrationAck, TransportError>>>,
    heartbeat_script: Mutex<VecDeque<Result<HeartbeatResponse, TransportError>>>,
    delay: Mutex<Option<Duration>>,
    registrations: Mutex<Vec<NodeIdentity>>,
    reports: Mutex<Vec<NodeStatusReport>>,
    version_calls: AtomicUsize,
    register_calls: AtomicUsize,
    heartbeat_calls: AtomicUsize,
}

impl MockControllerClient {
    /// Creates a mock whose default version response is `descriptor`.
    pub fn new(descriptor: NamespaceDescriptor) -> Self {
        Self {
            inner: Arc::new(MockInner {
                descriptor: Mutex::new(descriptor),
                version_script: Mutex::new(VecDeque::new()),
                register_script: Mutex::new(VecDeque::new()),
                heartbeat_script: Mutex::new(VecDeque::new()),
                delay: Mutex::new(None),
                registrations: Mutex::new(Vec::new()),
                reports: Mutex::new(Vec::new()),
                version_calls: AtomicUsize::new(0),
                register_calls: AtomicUsize::new(0),
                heartbeat_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Replaces the default descriptor (what an unscripted version request returns).
    pub fn set_descriptor(&self, descriptor: NamespaceDescriptor) {
        *self.inner.descriptor.lock() = descriptor;
    }

    pub fn descriptor(&self) -> NamespaceDescriptor {
        self.inner.descriptor.lock().clone()
    }

    pub fn push_version(&self, result: Result<NamespaceDescriptor, TransportError>) {
        self.inner.version_script.lock().push_back(result);
    }

    pub fn push_register(&self, result: Result<RegistrationAck, TransportError>) {
        self.inner.register_script.lock().push_back(result);
    }

    pub fn push_heartbeat(&self, result: Result<HeartbeatResponse, TransportError>) {
        self.inner.heartbeat_script.lock().push_back(result);
    }

    /// Makes every subsequent call sleep for `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.inner.delay.lock() = delay;
    }

    pub fn version_calls(&self) -> usize {
        self.inner.version_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.inner.register_calls.load(Ordering::SeqCst)
    }

    pub fn heartbeat_calls(&self) -> usize {
        self.inner.heartbeat_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.version_calls() + self.register_calls() + self.heartbeat_calls()
    }

    /// Identities received by `register`, oldest first.
    pub fn registrations(&self) -> Vec<NodeIdentity> {
        self.inner.registrations.lock().clone()
    }

    /// Reports received by `heartbeat`, oldest first.
    pub fn reports(&self) -> Vec<NodeStatusReport> {
        self.inner.reports.lock().clone()
    }

    async fn maybe_delay(&self) {
        let delay = *self.inner.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl ControllerClient for MockControllerClient {
    async fn version_request(&self) -> Result<NamespaceDescriptor, TransportError> {
        self.inner.version_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;
        let scripted = self.inner.version_script.lock().pop_front();
        match scripted {
            Some(r) => r,
            None => Ok(self.descriptor()),
        }
    }

    async fn register(&self, identity: &NodeIdentity) -> Result<RegistrationAck, TransportError> {
        self.inner.register_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;
        self.inner.registrations.lock().push(identity.clone());
        let scripted = self.inner.register_script.lock().pop_front();
        match scripted {
            Some(r) => r,
            None => Ok(RegistrationAck::accepted(format!(
                "reg-{}",
                self.inner.register_calls.load(Ordering::SeqCst)
            ))),
        }
    }

    async fn heartbeat(
        &self,
        status: &NodeStatusReport,
    ) -> Result<HeartbeatResponse, TransportError> {
        self.inner.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;
        self.inner.reports.lock().push(status.clone());
        let scripted = self.inner.heartbeat_script.lock().pop_front();
        match scripted {
            Some(r) => r,
            None => Ok(HeartbeatResponse::ok()),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
