use thiserror::Error;

use crate::CoordinationError;

/// Errors from the composite operations built on top of a client.
#[derive(Debug, Error)]
pub enum OperationError<E: CoordinationError> {
    /// The underlying client failed.
    #[error(transparent)]
    Coordination(#[from] E),

    /// A node this process expected to own holds someone else's data.
    #[error("node {0} already exists with different data")]
    DataMismatch(String),

    /// The session ended while waiting on a node.
    #[error("session closed while waiting on {0}")]
    SessionClosed(String),

    /// The parent of a node to create does not exist.
    #[error("parent of {0} does not exist")]
    MissingParent(String),
}
