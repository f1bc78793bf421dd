use convoy_coordination::{CoordinationError, ResultCode, SessionId};
use thiserror::Error;

/// The result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection dropped before the reply arrived.
    #[error("connection lost")]
    ConnectionLoss,

    /// None of the configured hosts accepted the session.
    #[error("could not reach any coordination host of {0:?}")]
    Unreachable(Vec<String>),

    /// I/O error.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The peer sent a message out of sequence.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The store rejected the operation.
    #[error("{message}")]
    Remote {
        /// Classification of the failure.
        code: ResultCode,

        /// Description from the store.
        message: String,
    },

    /// The session was closed or timed out.
    #[error("session {0} has expired")]
    SessionExpired(SessionId),
}

impl CoordinationError for Error {
    fn code(&self) -> ResultCode {
        match self {
            Self::ConnectionLoss => ResultCode::ConnectionLoss,
            Self::Remote { code, .. } => *code,
            Self::Unreachable(_)
            | Self::Io(..)
            | Self::Json(_)
            | Self::Protocol(_)
            | Self::SessionExpired(_) => ResultCode::OtherError,
        }
    }
}
