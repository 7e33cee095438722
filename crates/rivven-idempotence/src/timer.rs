//! Single-shot, rearmable retry timer
//!
//! Firing posts [`ControllerOp::RetryTimer`] onto the controller queue rather
//! than calling back directly, so the retry runs on the controller task like
//! every other transition.

use crate::controller::ControllerOp;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

pub(crate) struct RetryTimer {
    ops_tx: mpsc::UnboundedSender<ControllerOp>,
    handle: Option<JoinHandle<()>>,
    /// Bumped on every arm and stop; a firing for an older generation is stale
    generation: u64,
}

impl RetryTimer {
    pub(crate) fn new(ops_tx: mpsc::UnboundedSender<ControllerOp>) -> Self {
        Self {
            ops_tx,
            handle: None,
            generation: 0,
        }
    }

    /// Arm the timer, replacing any pending arming
    pub(crate) fn start_oneshot(&mut self, delay: Duration) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }

        self.generation += 1;
        let generation = self.generation;
        let ops_tx = self.ops_tx.clone();

        trace!("Arming PID retry timer in {:?} (generation {})", delay, generation);

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = ops_tx.send(ControllerOp::RetryTimer { generation });
        }));
    }

    /// Consume a firing. Returns false for stale firings.
    pub(crate) fn fired(&mut self, generation: u64) -> bool {
        if self.handle.is_none() || generation != self.generation {
            return false;
        }
        self.handle = None;
        true
    }

    /// Cancel the pending arming
    ///
    /// With `wait`, returns only once the timer task has finished, after
    /// which no firing of an earlier arming is honored.
    pub(crate) async fn stop(&mut self, wait: bool) {
        self.generation += 1;
        if let Some(handle) = self.handle.take() {
            handle.abort();
            if wait {
                let _ = handle.await;
            }
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
