use thiserror::Error;

use crate::pid::ProducerId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No usable broker available")]
    NoUsableBroker,

    #[error("Request rejected by broker {broker}: {reason}")]
    RequestRejected { broker: String, reason: String },

    /// The owning client is shutting down
    #[error("Client is shutting down")]
    Destroyed,

    #[error("Broker returned invalid {0}")]
    BadResponse(ProducerId),

    #[error("Request was dropped before a response arrived")]
    RequestDropped,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Idempotent producer terminated")]
    Terminated,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Whether acquisition should be retried after this error
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::NoUsableBroker
                | Error::RequestRejected { .. }
                | Error::BadResponse(_)
                | Error::RequestDropped
                | Error::ServerError(_)
        )
    }

    /// Whether this error signals client teardown
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Error::Destroyed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
