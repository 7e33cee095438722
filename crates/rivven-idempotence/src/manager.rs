//! Public handle for the idempotent producer PID lifecycle

use crate::broker::{BrokerRef, Collaborators};
use crate::config::IdempotenceConfig;
use crate::controller::{ControllerOp, IdempotenceEvent, PidController, RequestOutcome};
use crate::error::{Error, Result};
use crate::pid::ProducerId;
use crate::state::{IdempotenceState, SharedState, StateSnapshot};
use crate::stats::{IdempotenceStats, IdempotenceStatsSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Owns the PID controller task of one idempotent producer
///
/// # Example
///
/// ```rust,ignore
/// use rivven_idempotence::{Collaborators, IdempotenceConfig, IdempotenceManager};
///
/// let manager = IdempotenceManager::start(
///     IdempotenceConfig::default(),
///     Collaborators::new(selector, requester),
/// )?;
///
/// // A broker connection came up
/// manager.request_pid(Some(&broker), "broker up").await?;
///
/// let pid = manager.wait_for_pid().await?;
/// ```
pub struct IdempotenceManager {
    config: Arc<IdempotenceConfig>,
    shared: Arc<SharedState>,
    ops_tx: mpsc::UnboundedSender<ControllerOp>,
    events: broadcast::Sender<IdempotenceEvent>,
    stats: Arc<IdempotenceStats>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IdempotenceManager {
    /// Initialize idempotence and spawn the controller task
    ///
    /// Must be called from within a tokio runtime. On return the state is
    /// `RequestPID` and the first retry is scheduled.
    pub fn start(config: IdempotenceConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| Error::ConfigError(format!("no tokio runtime: {}", e)))?;

        let config = Arc::new(config);
        let shared = Arc::new(SharedState::new());
        let stats = Arc::new(IdempotenceStats::new());
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_channel_capacity);

        let mut controller = PidController::new(
            Arc::clone(&config),
            Arc::clone(&shared),
            collaborators,
            ops_tx.clone(),
            events.clone(),
            Arc::clone(&stats),
        );

        // Enter the runtime so the retry timer can spawn
        let task = {
            let _guard = runtime.enter();
            controller.init();
            runtime.spawn(controller.run(ops_rx))
        };

        info!(
            "Idempotent producer initialized (retry interval {:?})",
            config.retry_interval
        );

        Ok(Self {
            config,
            shared,
            ops_tx,
            events,
            stats,
            task: Mutex::new(Some(task)),
        })
    }

    /// Attempt to acquire a PID
    ///
    /// With `broker` the request goes to that broker, otherwise to any
    /// usable one. A no-op unless the state is `RequestPID`.
    pub async fn request_pid(
        &self,
        broker: Option<&BrokerRef>,
        reason: impl Into<String>,
    ) -> Result<RequestOutcome> {
        let (reply, rx) = oneshot::channel();
        self.ops_tx
            .send(ControllerOp::RequestPid {
                broker: broker.cloned(),
                reason: reason.into(),
                reply,
            })
            .map_err(|_| Error::Terminated)?;
        rx.await.map_err(|_| Error::Terminated)
    }

    /// Drop the current PID and acquire a new one
    pub async fn reinit(&self, reason: impl Into<String>) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.ops_tx
            .send(ControllerOp::Reinit {
                reason: reason.into(),
                done,
            })
            .map_err(|_| Error::Terminated)?;
        rx.await.map_err(|_| Error::Terminated)
    }

    /// Terminate idempotence and stop the controller task
    ///
    /// Cancels the retry timer and wakes PID waiters with
    /// [`Error::Terminated`]. Responses still in flight are discarded.
    /// Calling it again is a no-op.
    pub async fn terminate(&self) {
        let (done, rx) = oneshot::channel();
        if self
            .ops_tx
            .send(ControllerOp::Terminate { done: Some(done) })
            .is_ok()
        {
            let _ = rx.await;
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Idempotence controller task failed: {}", e);
            }
        }
    }

    /// Whether the producer must hold back until a PID is assigned
    pub fn needs_pid(&self) -> bool {
        self.shared.read().needs_pid()
    }

    /// Current PID, if assigned
    pub fn pid(&self) -> Option<ProducerId> {
        let record = self.shared.read();
        (record.state() == IdempotenceState::Assigned).then(|| record.pid())
    }

    pub fn state(&self) -> IdempotenceState {
        self.shared.read().state()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.shared.read().snapshot()
    }

    /// Wait until a PID is assigned
    ///
    /// Bounded by `wait_for_pid_timeout` when configured. Fails with
    /// [`Error::Terminated`] if the producer terminates first.
    pub async fn wait_for_pid(&self) -> Result<ProducerId> {
        match self.config.wait_for_pid_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.shared.wait_for_pid())
                .await
                .map_err(|_| Error::Timeout(format!("no ProducerId after {:?}", timeout)))?,
            None => self.shared.wait_for_pid().await,
        }
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<IdempotenceEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> IdempotenceStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &IdempotenceConfig {
        &self.config
    }
}

impl Drop for IdempotenceManager {
    fn drop(&mut self) {
        // Best effort; the task exits after processing it
        let _ = self.ops_tx.send(ControllerOp::Terminate { done: None });
    }
}

impl std::fmt::Debug for IdempotenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotenceManager")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
