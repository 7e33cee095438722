//! Producer ID lifecycle for the Rivven idempotent producer
//!
//! An idempotent producer must hold a Producer ID (PID) and epoch, assigned
//! by the cluster, before it may send. This crate acquires that PID: it picks
//! a broker, submits an InitProducerId request, applies the response, and
//! retries on a fixed interval until it succeeds or the producer terminates.
//!
//! Broker selection, request transport and connection wakeups are supplied
//! by the embedding client through the traits in [`broker`].
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_idempotence::{Collaborators, IdempotenceConfig, IdempotenceManager};
//! use std::time::Duration;
//!
//! let config = IdempotenceConfig::builder()
//!     .retry_interval(Duration::from_millis(500))
//!     .escalate_after_failures(10)
//!     .build();
//!
//! let manager = IdempotenceManager::start(config, Collaborators::new(selector, requester))?;
//!
//! // Producer connections check before sending
//! if manager.needs_pid() {
//!     let pid = manager.wait_for_pid().await?;
//! }
//!
//! manager.terminate().await;
//! ```

pub mod broker;
pub mod config;
pub mod controller;
pub mod error;
pub mod manager;
pub mod pid;
pub mod state;
pub mod stats;
mod timer;

pub use broker::{
    Broker, BrokerRef, BrokerSelector, BrokerState, Collaborators, ConnectionWaker, NoopWaker,
    PidRequester,
};
pub use config::{IdempotenceConfig, IdempotenceConfigBuilder, DEFAULT_RETRY_INTERVAL};
pub use controller::{IdempotenceEvent, PidReply, RequestOutcome};
pub use error::{Error, Result};
pub use manager::IdempotenceManager;
pub use pid::ProducerId;
pub use state::{IdempotenceState, StateRecord, StateSnapshot};
pub use stats::{IdempotenceMetrics, IdempotenceStatsSnapshot};
