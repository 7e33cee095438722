//! PID acquisition controller
//!
//! A single controller task owns every state transition. Requests, broker
//! responses and retry-timer firings all arrive as [`ControllerOp`]s on one
//! queue and are applied in order, so two transitions never race. Producer
//! connection tasks only read the shared [`StateRecord`](crate::StateRecord).
//!
//! ```text
//!            init()                submit ok             valid PID
//!   Init ────────────> RequestPID ───────────> WaitPID ───────────> Assigned
//!                          ^   │                  │
//!                          │   │ no broker /      │ error / invalid PID
//!                          │   │ rejected         │
//!                          │   └── retry timer ───┤
//!                          └──────────────────────┘
//!
//!   any state ── terminate() ──> Terminated
//! ```

use crate::broker::{BrokerRef, BrokerState, Collaborators};
use crate::config::IdempotenceConfig;
use crate::error::{Error, Result};
use crate::pid::ProducerId;
use crate::state::{IdempotenceState, SharedState};
use crate::stats::{IdempotenceMetrics, IdempotenceStats};
use crate::timer::RetryTimer;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Result of a PID acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A request was handed to a broker
    Enqueued,
    /// No usable broker; a retry is scheduled
    NoBroker,
    /// The request was rejected locally; a retry is scheduled
    Rejected,
    /// No PID is needed right now (already requesting, assigned or terminated)
    Skipped,
}

/// Notifications published by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotenceEvent {
    StateChanged {
        from: IdempotenceState,
        to: IdempotenceState,
    },
    PidAssigned {
        pid: ProducerId,
        previous: Option<ProducerId>,
    },
    /// Acquisition keeps failing; retries continue
    AcquisitionStalled {
        consecutive_failures: u32,
        last_error: String,
    },
}

pub(crate) enum ControllerOp {
    RequestPid {
        broker: Option<BrokerRef>,
        reason: String,
        reply: oneshot::Sender<RequestOutcome>,
    },
    PidResponse {
        broker: BrokerRef,
        attempt: u64,
        result: Result<ProducerId>,
    },
    RetryTimer {
        generation: u64,
    },
    Reinit {
        reason: String,
        done: oneshot::Sender<()>,
    },
    Terminate {
        done: Option<oneshot::Sender<()>>,
    },
}

// ============================================================================
// Completion handle
// ============================================================================

/// Completion handle for one InitProducerId request
///
/// Routes the broker's answer back onto the controller queue. Completing
/// consumes the handle; dropping it unanswered reports
/// [`Error::RequestDropped`].
pub struct PidReply {
    broker: BrokerRef,
    attempt: u64,
    ops_tx: Option<mpsc::UnboundedSender<ControllerOp>>,
}

impl PidReply {
    pub(crate) fn new(
        broker: BrokerRef,
        attempt: u64,
        ops_tx: mpsc::UnboundedSender<ControllerOp>,
    ) -> Self {
        Self {
            broker,
            attempt,
            ops_tx: Some(ops_tx),
        }
    }

    /// Broker the request was sent to
    pub fn broker(&self) -> &BrokerRef {
        &self.broker
    }

    /// Attempt id the response will be matched against
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Deliver the PID from a successful response
    pub fn succeed(mut self, pid: ProducerId) {
        self.complete(Ok(pid));
    }

    /// Deliver a failed request
    pub fn fail(mut self, error: Error) {
        self.complete(Err(error));
    }

    fn complete(&mut self, result: Result<ProducerId>) {
        if let Some(ops_tx) = self.ops_tx.take() {
            // The controller may already be gone
            let _ = ops_tx.send(ControllerOp::PidResponse {
                broker: Arc::clone(&self.broker),
                attempt: self.attempt,
                result,
            });
        }
    }
}

impl Drop for PidReply {
    fn drop(&mut self) {
        self.complete(Err(Error::RequestDropped));
    }
}

impl fmt::Debug for PidReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PidReply")
            .field("broker", &self.broker.name())
            .field("attempt", &self.attempt)
            .field("completed", &self.ops_tx.is_none())
            .finish()
    }
}

// ============================================================================
// Controller
// ============================================================================

pub(crate) struct PidController {
    config: Arc<IdempotenceConfig>,
    shared: Arc<SharedState>,
    collaborators: Collaborators,
    timer: RetryTimer,
    ops_tx: mpsc::UnboundedSender<ControllerOp>,
    events: broadcast::Sender<IdempotenceEvent>,
    stats: Arc<IdempotenceStats>,
}

impl PidController {
    pub(crate) fn new(
        config: Arc<IdempotenceConfig>,
        shared: Arc<SharedState>,
        collaborators: Collaborators,
        ops_tx: mpsc::UnboundedSender<ControllerOp>,
        events: broadcast::Sender<IdempotenceEvent>,
        stats: Arc<IdempotenceStats>,
    ) -> Self {
        Self {
            config,
            shared,
            collaborators,
            timer: RetryTimer::new(ops_tx.clone()),
            ops_tx,
            events,
            stats,
        }
    }

    /// Drain the operation queue until terminated
    pub(crate) async fn run(mut self, mut ops_rx: mpsc::UnboundedReceiver<ControllerOp>) {
        while let Some(op) = ops_rx.recv().await {
            if !self.handle(op).await {
                break;
            }
        }
        debug!("Idempotence controller stopped");
    }

    /// Apply one operation. Returns false once terminated.
    pub(crate) async fn handle(&mut self, op: ControllerOp) -> bool {
        match op {
            ControllerOp::RequestPid {
                broker,
                reason,
                reply,
            } => {
                let outcome = self.request_pid(broker, &reason);
                let _ = reply.send(outcome);
            }
            ControllerOp::PidResponse {
                broker,
                attempt,
                result,
            } => match result {
                Ok(pid) => self.on_pid_received(&broker, attempt, pid),
                Err(error) => self.on_pid_failed(&broker, attempt, error),
            },
            ControllerOp::RetryTimer { generation } => self.on_retry_timer(generation),
            ControllerOp::Reinit { reason, done } => {
                self.reinit(&reason);
                let _ = done.send(());
            }
            ControllerOp::Terminate { done } => {
                self.terminate().await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
                return false;
            }
        }
        true
    }

    /// Reset to "needs PID" and schedule the first attempt
    ///
    /// Runs before the controller task processes any operation.
    pub(crate) fn init(&mut self) {
        let changed = {
            let mut record = self.shared.write();
            record.reset_pid();
            record.clear_failures();
            record.set_state(IdempotenceState::RequestPid)
        };
        self.publish_transition(changed, IdempotenceState::RequestPid);

        // Brokers are rarely up this early; start the timer and let broker
        // connections trigger an earlier attempt.
        self.timer.start_oneshot(self.config.retry_interval);
    }

    /// Drop the current PID and acquire a new one
    pub(crate) fn reinit(&mut self, reason: &str) {
        if self.shared.read().state().is_terminated() {
            debug!("Not reinitializing terminated idempotent producer: {}", reason);
            return;
        }
        info!("Reinitializing idempotent producer: {}", reason);
        self.init();
    }

    /// Move to the terminal state and cancel the retry timer
    pub(crate) async fn terminate(&mut self) {
        let changed = {
            let mut record = self.shared.write();
            record.reset_pid();
            record.set_state(IdempotenceState::Terminated)
        };

        // No retry may fire once this returns
        self.timer.stop(true).await;

        self.publish_transition(changed, IdempotenceState::Terminated);
        self.shared.notify_waiters();
    }

    /// Acquire a PID from `broker`, or from any usable broker
    pub(crate) fn request_pid(&mut self, broker: Option<BrokerRef>, reason: &str) -> RequestOutcome {
        {
            let record = self.shared.read();
            if record.state() != IdempotenceState::RequestPid {
                trace!(
                    "Not acquiring ProducerId ({}) in state {}",
                    reason,
                    record.state()
                );
                return RequestOutcome::Skipped;
            }
        }

        // Owned reference for this scope, released on every return below
        let broker = match broker.or_else(|| self.collaborators.selector.any_usable()) {
            Some(broker) => broker,
            None => {
                debug!("No usable broker to acquire ProducerId from ({})", reason);
                self.stats.no_broker();
                self.record_failure(&Error::NoUsableBroker);
                self.restart_request_pid_timer();
                return RequestOutcome::NoBroker;
            }
        };

        debug!(broker = %broker.name(), "Acquiring ProducerId: {}", reason);

        let attempt = self.shared.write().next_attempt();
        let reply = PidReply::new(Arc::clone(&broker), attempt, self.ops_tx.clone());

        match self
            .collaborators
            .requester
            .submit_init_producer_id(&broker, reply)
        {
            Ok(()) => {
                // The response is queued behind this operation, so it cannot
                // be applied before the transition.
                let changed = self.shared.write().set_state(IdempotenceState::WaitPid);
                self.publish_transition(changed, IdempotenceState::WaitPid);
                self.stats.request_enqueued();
                RequestOutcome::Enqueued
            }
            Err(reason) => {
                debug!(
                    broker = %broker.name(),
                    "Can't acquire ProducerId from this broker: {}", reason
                );
                self.stats.request_rejected();
                self.record_failure(&Error::RequestRejected {
                    broker: broker.name().to_string(),
                    reason,
                });
                self.restart_request_pid_timer();
                RequestOutcome::Rejected
            }
        }
    }

    fn on_retry_timer(&mut self, generation: u64) {
        if !self.timer.fired(generation) {
            trace!("Ignoring stale PID retry timer (generation {})", generation);
            return;
        }
        self.request_pid(None, "retry timer");
    }

    fn restart_request_pid_timer(&mut self) {
        self.stats.retry_scheduled();
        self.timer.start_oneshot(self.config.retry_interval);
    }

    /// Apply an InitProducerId response
    pub(crate) fn on_pid_received(&mut self, broker: &BrokerRef, attempt: u64, pid: ProducerId) {
        let mut record = self.shared.write();

        if record.state() != IdempotenceState::WaitPid || record.attempt() != attempt {
            let state = record.state();
            let current = record.attempt();
            drop(record);
            debug!(
                broker = %broker.name(),
                "Ignoring InitProducerId response ({}) in state {} (attempt {}, current {})",
                pid, state, attempt, current
            );
            self.stats.stale_response();
            return;
        }

        if !pid.is_valid() {
            drop(record);
            warn!(broker = %broker.name(), "Acquired invalid {}: ignoring", pid);
            self.stats.bad_response();
            self.on_pid_failed(broker, attempt, Error::BadResponse(pid));
            return;
        }

        let previous = record.assign_pid(pid);
        match previous {
            Some(previous) => debug!("Acquired {} (previous {})", pid, previous),
            None => debug!("Acquired {}", pid),
        }
        record.clear_failures();
        let changed = record.set_state(IdempotenceState::Assigned);
        drop(record);

        self.stats.pid_acquired();
        self.publish_transition(changed, IdempotenceState::Assigned);

        // Wake producers waiting for a PID
        self.shared.notify_waiters();
        self.collaborators.waker.wakeup_all(BrokerState::Up);

        self.publish(IdempotenceEvent::PidAssigned { pid, previous });
    }

    /// Handle a failed InitProducerId request
    pub(crate) fn on_pid_failed(&mut self, broker: &BrokerRef, attempt: u64, error: Error) {
        if error.is_destroyed() {
            trace!(broker = %broker.name(), "Ignoring PID failure during shutdown");
            return;
        }

        let mut record = self.shared.write();
        if record.state() != IdempotenceState::WaitPid || record.attempt() != attempt {
            let state = record.state();
            drop(record);
            debug!(
                broker = %broker.name(),
                "Ignoring PID failure for attempt {} in state {}: {}", attempt, state, error
            );
            self.stats.stale_response();
            return;
        }
        let changed = record.set_state(IdempotenceState::RequestPid);
        drop(record);

        debug!(broker = %broker.name(), "Failed to acquire PID: {}", error);

        // TODO: surface non-retriable broker errors (e.g. unsupported
        // InitProducerId version) to the application instead of retrying.
        self.stats.failure();
        self.publish_transition(changed, IdempotenceState::RequestPid);
        self.record_failure(&error);
        self.restart_request_pid_timer();
    }

    fn record_failure(&mut self, error: &Error) {
        let failures = self.shared.write().record_failure();

        let Some(threshold) = self.config.escalate_after_failures else {
            return;
        };
        if threshold > 0 && failures % threshold == 0 {
            warn!(
                "Unable to acquire ProducerId after {} consecutive failures: {}",
                failures, error
            );
            self.publish(IdempotenceEvent::AcquisitionStalled {
                consecutive_failures: failures,
                last_error: error.to_string(),
            });
        }
    }

    fn publish_transition(&self, changed: Option<IdempotenceState>, to: IdempotenceState) {
        if let Some(from) = changed {
            IdempotenceMetrics::set_state(to);
            self.publish(IdempotenceEvent::StateChanged { from, to });
        }
    }

    fn publish(&self, event: IdempotenceEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
