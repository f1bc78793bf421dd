use convoy_coordination::{CoordinationError, ResultCode, SessionId};
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The request or its reply was lost (injected fault).
    #[error("connection lost")]
    ConnectionLoss,

    /// The addressed node, or the parent of a node to create, is missing.
    #[error("no node at {0}")]
    NoNode(String),

    /// A node already exists at the path.
    #[error("node {0} already exists")]
    NodeExists(String),

    /// A conditional write found the node at another version.
    #[error("version mismatch on {path}: expected {expected}, found {actual}")]
    BadVersion {
        /// The node written to.
        path: String,

        /// The version the caller expected.
        expected: i32,

        /// The version the node is at.
        actual: i32,
    },

    /// The node to delete still has children.
    #[error("node {0} has children")]
    NotEmpty(String),

    /// Ephemeral nodes cannot have children.
    #[error("ephemeral node {0} cannot have children")]
    NoChildrenForEphemerals(String),

    /// The path is not a valid absolute node path.
    #[error("invalid path {0:?}")]
    InvalidPath(String),

    /// The session has been closed or expired.
    #[error("session {0} has expired")]
    SessionExpired(SessionId),
}

impl CoordinationError for Error {
    fn code(&self) -> ResultCode {
        match self {
            Self::ConnectionLoss => ResultCode::ConnectionLoss,
            Self::NoNode(_) => ResultCode::NoNode,
            Self::NodeExists(_) => ResultCode::NodeExists,
            Self::BadVersion { .. }
            | Self::NotEmpty(_)
            | Self::NoChildrenForEphemerals(_)
            | Self::InvalidPath(_)
            | Self::SessionExpired(_) => ResultCode::OtherError,
        }
    }
}
