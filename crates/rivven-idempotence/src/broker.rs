//! Broker-facing collaborator interfaces
//!
//! Connection management, broker health tracking and the InitProducerId wire
//! encoding live outside this crate. The controller reaches them only
//! through the traits below.

use crate::controller::PidReply;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Broker connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerState {
    #[default]
    Init,
    Down,
    Connect,
    Up,
}

/// A cluster member able to serve InitProducerId
pub trait Broker: Send + Sync + fmt::Debug {
    /// Broker node id
    fn id(&self) -> i32;

    /// Human-readable name used in logs
    fn name(&self) -> &str;
}

/// Shared broker handle
///
/// Cloning takes a reference, dropping releases it.
pub type BrokerRef = Arc<dyn Broker>;

/// Supplies a usable broker on demand
pub trait BrokerSelector: Send + Sync {
    /// Any broker currently considered usable, or `None`
    ///
    /// Called without the idempotence state lock held.
    fn any_usable(&self) -> Option<BrokerRef>;
}

/// Submits InitProducerId requests
pub trait PidRequester: Send + Sync {
    /// Enqueue one request on `broker`
    ///
    /// On success the implementation must eventually complete `reply`
    /// exactly once. An `Err` means the request was rejected locally and
    /// nothing was sent.
    fn submit_init_producer_id(
        &self,
        broker: &BrokerRef,
        reply: PidReply,
    ) -> std::result::Result<(), String>;
}

/// Wakes producer connections parked waiting for a PID
pub trait ConnectionWaker: Send + Sync {
    /// Wake every connection currently in `state`
    fn wakeup_all(&self, state: BrokerState);
}

/// Waker for deployments that rely only on
/// [`IdempotenceManager::wait_for_pid`](crate::IdempotenceManager::wait_for_pid)
#[derive(Debug, Default)]
pub struct NoopWaker;

impl ConnectionWaker for NoopWaker {
    fn wakeup_all(&self, _state: BrokerState) {}
}

/// Everything the controller needs from the surrounding client
#[derive(Clone)]
pub struct Collaborators {
    pub selector: Arc<dyn BrokerSelector>,
    pub requester: Arc<dyn PidRequester>,
    pub waker: Arc<dyn ConnectionWaker>,
}

impl Collaborators {
    pub fn new(selector: Arc<dyn BrokerSelector>, requester: Arc<dyn PidRequester>) -> Self {
        Self {
            selector,
            requester,
            waker: Arc::new(NoopWaker),
        }
    }

    /// Use a custom connection waker
    pub fn with_waker(mut self, waker: Arc<dyn ConnectionWaker>) -> Self {
        self.waker = waker;
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
