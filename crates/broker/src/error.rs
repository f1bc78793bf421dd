use std::io;

use thiserror::Error;

use crate::lifecycle::BrokerState;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a broker.
#[derive(Debug, Error)]
pub enum Error {
    /// A coordination operation failed.
    #[error("coordination error: {0}")]
    Coordination(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A descriptor could not be decoded.
    #[error(transparent)]
    Descriptor(#[from] convoy_descriptor::Error),

    /// The wait was interrupted by shutdown.
    #[error("interrupted by shutdown")]
    Interrupted,

    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// Boot was attempted before every state had an action.
    #[error("no action bound for state {0}")]
    MissingAction(BrokerState),

    /// The own descriptor node does not exist.
    #[error("descriptor node {0} does not exist")]
    MissingDescriptor(String),

    /// A service record could not be encoded or decoded.
    #[error(transparent)]
    Naming(#[from] convoy_naming::Error),

    /// The supervised process could not be managed.
    #[error(transparent)]
    Supervisor(#[from] convoy_supervisor::Error),
}

impl Error {
    /// Wraps a coordination failure.
    pub fn coordination(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Coordination(Box::new(err))
    }
}
