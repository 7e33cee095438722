//! Idempotence state record and waiter notification
//!
//! The record is written only by the controller task and read by any number
//! of producer connection tasks. A `parking_lot::RwLock` guards it; the lock
//! is never held across an `.await`.

use crate::error::{Error, Result};
use crate::pid::ProducerId;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

/// Idempotent producer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IdempotenceState {
    /// Not yet initialized
    #[default]
    Init,
    /// A PID is needed and no request is outstanding
    RequestPid,
    /// An InitProducerId request is in flight
    WaitPid,
    /// A valid PID is assigned
    Assigned,
    /// Terminal, no further transitions
    Terminated,
}

impl IdempotenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotenceState::Init => "Init",
            IdempotenceState::RequestPid => "RequestPID",
            IdempotenceState::WaitPid => "WaitPID",
            IdempotenceState::Assigned => "Assigned",
            IdempotenceState::Terminated => "Terminated",
        }
    }

    /// Whether the producer is still waiting for a PID
    pub fn needs_pid(&self) -> bool {
        matches!(
            self,
            IdempotenceState::RequestPid | IdempotenceState::WaitPid
        )
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, IdempotenceState::Terminated)
    }

    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    pub(crate) fn as_gauge(&self) -> f64 {
        match self {
            IdempotenceState::Init => 0.0,
            IdempotenceState::RequestPid => 1.0,
            IdempotenceState::WaitPid => 2.0,
            IdempotenceState::Assigned => 3.0,
            IdempotenceState::Terminated => 4.0,
        }
    }
}

impl fmt::Display for IdempotenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable idempotence state
#[derive(Debug)]
pub struct StateRecord {
    state: IdempotenceState,
    pid: ProducerId,
    /// Last valid PID held before the current one was reset
    previous_pid: ProducerId,
    state_changed_at: Instant,
    /// Id of the most recently submitted InitProducerId request
    attempt: u64,
    /// Failures since the last assignment
    consecutive_failures: u32,
}

impl StateRecord {
    pub(crate) fn new() -> Self {
        Self {
            state: IdempotenceState::Init,
            pid: ProducerId::INVALID,
            previous_pid: ProducerId::INVALID,
            state_changed_at: Instant::now(),
            attempt: 0,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> IdempotenceState {
        self.state
    }

    /// Current PID, valid only while [`IdempotenceState::Assigned`]
    pub fn pid(&self) -> ProducerId {
        self.pid
    }

    pub fn state_changed_at(&self) -> Instant {
        self.state_changed_at
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn needs_pid(&self) -> bool {
        self.state.needs_pid()
    }

    /// Set the state, returning the previous one if it changed
    pub(crate) fn set_state(&mut self, new_state: IdempotenceState) -> Option<IdempotenceState> {
        if self.state == new_state {
            return None;
        }

        debug!(
            "Idempotent producer state change {} -> {}",
            self.state, new_state
        );

        let old = self.state;
        self.state = new_state;
        self.state_changed_at = Instant::now();
        Some(old)
    }

    /// Install a new PID, returning the last valid PID held before it
    pub(crate) fn assign_pid(&mut self, pid: ProducerId) -> Option<ProducerId> {
        let old = std::mem::replace(&mut self.pid, pid);
        let previous = if old.is_valid() { old } else { self.previous_pid };
        previous.is_valid().then_some(previous)
    }

    pub(crate) fn reset_pid(&mut self) {
        if self.pid.is_valid() {
            self.previous_pid = self.pid;
        }
        self.pid = ProducerId::INVALID;
    }

    /// Allocate the id for the next request
    pub(crate) fn next_attempt(&mut self) -> u64 {
        self.attempt += 1;
        self.attempt
    }

    pub(crate) fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    pub(crate) fn clear_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state,
            pid: self.pid,
            in_state_for: self.state_changed_at.elapsed(),
            attempt: self.attempt,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

/// Point-in-time copy of the state record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: IdempotenceState,
    pub pid: ProducerId,
    /// Time since the last state change
    pub in_state_for: Duration,
    pub attempt: u64,
    pub consecutive_failures: u32,
}

/// State record shared between the controller and producer tasks
pub(crate) struct SharedState {
    record: RwLock<StateRecord>,
    /// Woken after a PID is assigned or the producer terminates
    waiters: Notify,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            record: RwLock::new(StateRecord::new()),
            waiters: Notify::new(),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, StateRecord> {
        self.record.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, StateRecord> {
        self.record.write()
    }

    /// Wake every task parked in [`SharedState::wait_for_pid`]
    ///
    /// Must be called with the record lock released.
    pub(crate) fn notify_waiters(&self) {
        self.waiters.notify_waiters();
    }

    /// Park until a PID is assigned or the producer terminates
    pub(crate) async fn wait_for_pid(&self) -> Result<ProducerId> {
        loop {
            // Register before checking so a broadcast between the check and
            // the await is not lost.
            let notified = self.waiters.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let record = self.record.read();
                match record.state() {
                    IdempotenceState::Assigned => return Ok(record.pid()),
                    IdempotenceState::Terminated => return Err(Error::Terminated),
                    _ => {}
                }
            }

            notified.await;
        }
    }
}
