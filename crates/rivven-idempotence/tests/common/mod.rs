//! Shared test doubles for the idempotence integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use rivven_idempotence::{
    Broker, BrokerRef, BrokerSelector, BrokerState, ConnectionWaker, PidReply, PidRequester,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Initialize tracing for tests (call once at start of test)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rivven_idempotence=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(condition: F, timeout: Duration) -> anyhow::Result<()>
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("Condition not met within {:?}", timeout)
}

#[derive(Debug)]
pub struct MockBroker {
    id: i32,
    name: String,
}

impl MockBroker {
    pub fn new(id: i32) -> BrokerRef {
        Arc::new(Self {
            id,
            name: format!("broker-{}", id),
        })
    }
}

impl Broker for MockBroker {
    fn id(&self) -> i32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Broker set, request transport and connection waker in one
#[derive(Default)]
pub struct MockCluster {
    usable: Mutex<Option<BrokerRef>>,
    rejection: Mutex<Option<String>>,
    pending: Mutex<Vec<PidReply>>,
    submissions: AtomicUsize,
    wakeups: AtomicUsize,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `broker` the one returned by `any_usable`
    pub fn set_usable(&self, broker: Option<BrokerRef>) {
        *self.usable.lock() = broker;
    }

    /// Reject every submission locally with `reason`
    pub fn reject_with(&self, reason: Option<&str>) {
        *self.rejection.lock() = reason.map(str::to_string);
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn wakeups(&self) -> usize {
        self.wakeups.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }

    /// Take the oldest outstanding request
    pub fn take_request(&self) -> Option<PidReply> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }
}

impl BrokerSelector for MockCluster {
    fn any_usable(&self) -> Option<BrokerRef> {
        self.usable.lock().clone()
    }
}

impl PidRequester for MockCluster {
    fn submit_init_producer_id(
        &self,
        _broker: &BrokerRef,
        reply: PidReply,
    ) -> std::result::Result<(), String> {
        if let Some(reason) = self.rejection.lock().clone() {
            return Err(reason);
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push(reply);
        Ok(())
    }
}

impl ConnectionWaker for MockCluster {
    fn wakeup_all(&self, state: BrokerState) {
        if state == BrokerState::Up {
            self.wakeups.fetch_add(1, Ordering::SeqCst);
        }
    }
}
