//! Session Metrics Module
//!
//! Lock-free counters for one controller session.
//!
//! ## Metrics Tracked
//!
//! | Metric | Description |
//! |--------|-------------|
//! | version_requests | Namespace fetches attempted |
//! | registrations | Registration RPCs attempted |
//! | heartbeats_sent | Heartbeats attempted |
//! | heartbeat_failures | Heartbeats that failed at transport level |
//! | transport_retries | Backoff waits taken after any transport failure |
//! | handshake_resets | Heartbeat loop abandoned for a fresh handshake |
//! | layout_mismatches | Accepted namespaces whose layout differed from the expected one |
//!
//! ## Usage
//!
//! ```ignore
//! use keel_node::metrics::SessionMetrics;
//!
//! let metrics = SessionMetrics::new();
//! metrics.record_version_request();
//! println!("{}", metrics.to_prometheus("ctrl-a"));
//! ```

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

// ════════════════════════════════════════════════════════════════════════════════
// SESSION METRICS
// ════════════════════════════════════════════════════════════════════════════════

/// Counters for a single worker session.
///
/// Increments use `Ordering::Relaxed`; reads use `Ordering::SeqCst`.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub version_requests: AtomicU64,
    pub registrations: AtomicU64,
    pub heartbeats_sent: AtomicU64,
    pub heartbeat_failures: AtomicU64,
    pub transport_retries: AtomicU64,
    pub handshake_resets: AtomicU64,
    pub layout_mismatches: AtomicU64,
}

impl SessionMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_version_request(&self) {
        self.version_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat_failure(&self) {
        self.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_retry(&self) {
        self.transport_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_reset(&self) {
        self.handshake_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_layout_mismatch(&self) {
        self.layout_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        SessionMetricsSnapshot {
            version_requests: self.version_requests.load(Ordering::SeqCst),
            registrations: self.registrations.load(Ordering::SeqCst),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::SeqCst),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::SeqCst),
            transport_retries: self.transport_retries.load(Ordering::SeqCst),
            handshake_resets: self.handshake_resets.load(Ordering::SeqCst),
            layout_mismatches: self.layout_mismatches.load(Ordering::SeqCst),
        }
    }

    /// Export in Prometheus exposition format, labelled with `controller`.
    ///
    /// ```text
    /// # HELP keel_session_version_requests_total Namespace fetches attempted
    /// # TYPE keel_session_version_requests_total counter
    /// keel_session_version_requests_total{controller="ctrl-a"} 3
    /// ...
    /// ```
    #[must_use]
    pub fn to_prometheus(&self, controller: &str) -> String {
        render_prometheus([(controller, self)])
    }
}

/// Renders several sessions as one exposition, one `HELP`/`TYPE` header per
/// metric family followed by a sample per controller.
pub fn render_prometheus<'a, I>(sessions: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a SessionMetrics)>,
{
    let snapshots: Vec<(String, SessionMetricsSnapshot)> = sessions
        .into_iter()
        .map(|(controller, m)| {
            let label = controller.replace('\\', "\\\\").replace('"', "\\\"");
            (label, m.snapshot())
        })
        .collect();

    let families: [(&str, &str, fn(&SessionMetricsSnapshot) -> u64); 7] = [
        ("version_requests", "Namespace fetches attempted", |s| s.version_requests),
        ("registrations", "Registration RPCs attempted", |s| s.registrations),
        ("heartbeats_sent", "Heartbeats attempted", |s| s.heartbeats_sent),
        ("heartbeat_failures", "Heartbeats failed at transport level", |s| s.heartbeat_failures),
        ("transport_retries", "Backoff waits after transport failures", |s| s.transport_retries),
        ("handshake_resets", "Heartbeat loop abandoned for a fresh handshake", |s| s.handshake_resets),
        ("layout_mismatches", "Accepted namespaces with unexpected layout", |s| s.layout_mismatches),
    ];

    let mut out = String::new();
    for (name, help, value) in families {
        let _ = write!(
            out,
            "# HELP keel_session_{name}_total {help}\n\
             # TYPE keel_session_{name}_total counter\n",
        );
        for (label, snap) in &snapshots {
            let _ = writeln!(
                out,
                "keel_session_{name}_total{{controller=\"{label}\"}} {}",
                value(snap)
            );
        }
    }
    out
}

/// Plain-value copy of [`SessionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMetricsSnapshot {
    pub version_requests: u64,
    pub registrations: u64,
    pub heartbeats_sent: u64,
    pub heartbeat_failures: u64,
    pub transport_retries: u64,
    pub handshake_resets: u64,
    pub layout_mismatches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zero() {
        assert_eq!(SessionMetrics::new().snapshot(), SessionMetricsSnapshot::default());
    }

    #[test]
    fn test_increments() {
        let m = SessionMetrics::new();
        m.record_version_request();
        m.record_version_request();
        m.record_heartbeat();
        m.record_heartbeat_failure();
        m.record_transport_retry();
        m.record_handshake_reset();
        m.record_layout_mismatch();
        m.record_registration();

        let s = m.snapshot();
        assert_eq!(s.version_requests, 2);
        assert_eq!(s.heartbeats_sent, 1);
        assert_eq!(s.heartbeat_failures, 1);
        assert_eq!(s.transport_retries, 1);
        assert_eq!(s.handshake_resets, 1);
        assert_eq!(s.layout_mismatches, 1);
        assert_eq!(s.registrations, 1);
    }

    #[test]
    fn test_prometheus_format() {
        let m = SessionMetrics::new();
        m.record_heartbeat();
        let out = m.to_prometheus("ctrl-a");
        assert!(out.contains("# TYPE keel_session_heartbeats_sent_total counter"));
        assert!(out.contains("keel_session_heartbeats_sent_total{controller=\"ctrl-a\"} 1"));
        assert!(out.contains("keel_session_handshake_resets_total{controller=\"ctrl-a\"} 0"));
        assert_eq!(out.lines().count(), 21);
    }

    #[test]
    fn test_render_several_sessions_shares_headers() {
        let a = SessionMetrics::new();
        let b = SessionMetrics::new();
        a.record_heartbeat();
        b.record_heartbeat();
        b.record_heartbeat();

        let out = render_prometheus([("ctrl-a", &a), ("ctrl-b", &b)]);
        assert_eq!(out.matches("# TYPE keel_session_heartbeats_sent_total").count(), 1);
        assert!(out.contains("keel_session_heartbeats_sent_total{controller=\"ctrl-a\"} 1"));
        assert!(out.contains("keel_session_heartbeats_sent_total{controller=\"ctrl-b\"} 2"));
        assert_eq!(out.lines().count(), 7 * 4);
    }

    #[test]
    fn test_prometheus_label_escaped() {
        let out = SessionMetrics::new().to_prometheus("a\"b");
        assert!(out.contains("controller=\"a\\\"b\""));
    }
}
