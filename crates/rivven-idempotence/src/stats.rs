//! Controller statistics and metrics
//!
//! Counters are always kept in-process and exposed as a snapshot. With the
//! `metrics` feature the same events are also recorded through the `metrics`
//! facade, following the `rivven_{component}_{name}` naming convention.

use crate::state::IdempotenceState;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// In-process counters
// ============================================================================

pub(crate) struct IdempotenceStats {
    requests_enqueued: AtomicU64,
    no_broker: AtomicU64,
    requests_rejected: AtomicU64,
    failures: AtomicU64,
    bad_responses: AtomicU64,
    stale_responses: AtomicU64,
    pids_acquired: AtomicU64,
    retries_scheduled: AtomicU64,
}

impl IdempotenceStats {
    pub(crate) fn new() -> Self {
        Self {
            requests_enqueued: AtomicU64::new(0),
            no_broker: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            bad_responses: AtomicU64::new(0),
            stale_responses: AtomicU64::new(0),
            pids_acquired: AtomicU64::new(0),
            retries_scheduled: AtomicU64::new(0),
        }
    }

    pub(crate) fn request_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::Relaxed);
        IdempotenceMetrics::increment_requests();
    }

    pub(crate) fn no_broker(&self) {
        self.no_broker.fetch_add(1, Ordering::Relaxed);
        IdempotenceMetrics::increment_no_broker();
    }

    pub(crate) fn request_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        IdempotenceMetrics::increment_rejected();
    }

    pub(crate) fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        IdempotenceMetrics::increment_failures();
    }

    pub(crate) fn bad_response(&self) {
        self.bad_responses.fetch_add(1, Ordering::Relaxed);
        IdempotenceMetrics::increment_bad_responses();
    }

    pub(crate) fn stale_response(&self) {
        self.stale_responses.fetch_add(1, Ordering::Relaxed);
        IdempotenceMetrics::increment_stale_responses();
    }

    pub(crate) fn pid_acquired(&self) {
        self.pids_acquired.fetch_add(1, Ordering::Relaxed);
        IdempotenceMetrics::increment_acquired();
    }

    pub(crate) fn retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        IdempotenceMetrics::increment_retries();
    }

    pub(crate) fn snapshot(&self) -> IdempotenceStatsSnapshot {
        IdempotenceStatsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::Relaxed),
            no_broker: self.no_broker.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            bad_responses: self.bad_responses.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
            pids_acquired: self.pids_acquired.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
        }
    }
}

/// Idempotence controller statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdempotenceStatsSnapshot {
    /// InitProducerId requests handed to a broker
    pub requests_enqueued: u64,
    /// Attempts that found no usable broker
    pub no_broker: u64,
    /// Requests rejected before being sent
    pub requests_rejected: u64,
    /// Failed responses (including bad responses)
    pub failures: u64,
    /// Responses carrying an invalid PID
    pub bad_responses: u64,
    /// Responses discarded as stale
    pub stale_responses: u64,
    /// PIDs successfully applied
    pub pids_acquired: u64,
    /// Retry timer armings
    pub retries_scheduled: u64,
}

impl IdempotenceStatsSnapshot {
    /// Total attempts that did not end in an enqueued request
    pub fn attempts_without_request(&self) -> u64 {
        self.no_broker + self.requests_rejected
    }
}

// ============================================================================
// Metrics facade
// ============================================================================

/// Idempotence controller metrics
pub struct IdempotenceMetrics;

impl IdempotenceMetrics {
    // ---- Counters ----

    pub fn increment_requests() {
        #[cfg(feature = "metrics")]
        metrics::counter!("rivven_idempotence_pid_requests_total").increment(1);
    }

    pub fn increment_no_broker() {
        #[cfg(feature = "metrics")]
        metrics::counter!("rivven_idempotence_no_broker_total").increment(1);
    }

    pub fn increment_rejected() {
        #[cfg(feature = "metrics")]
        metrics::counter!("rivven_idempotence_pid_requests_rejected_total").increment(1);
    }

    pub fn increment_failures() {
        #[cfg(feature = "metrics")]
        metrics::counter!("rivven_idempotence_pid_failures_total").increment(1);
    }

    pub fn increment_bad_responses() {
        #[cfg(feature = "metrics")]
        metrics::counter!("rivven_idempotence_bad_responses_total").increment(1);
    }

    pub fn increment_stale_responses() {
        #[cfg(feature = "metrics")]
        metrics::counter!("rivven_idempotence_stale_responses_total").increment(1);
    }

    pub fn increment_acquired() {
        #[cfg(feature = "metrics")]
        metrics::counter!("rivven_idempotence_pids_acquired_total").increment(1);
    }

    pub fn increment_retries() {
        #[cfg(feature = "metrics")]
        metrics::counter!("rivven_idempotence_retries_total").increment(1);
    }

    // ---- Gauges ----

    /// Current state (0=Init, 1=RequestPID, 2=WaitPID, 3=Assigned, 4=Terminated)
    pub fn set_state(state: IdempotenceState) {
        #[cfg(feature = "metrics")]
        metrics::gauge!("rivven_idempotence_state").set(state.as_gauge());
        #[cfg(not(feature = "metrics"))]
        let _ = state;
    }
}
