//! Wire messages. Every frame is a length-delimited JSON document.

use bytes::Bytes;
use convoy_coordination::{CreateMode, ResultCode, SessionId, Stat, WatchEvent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifier the server assigns to a registered watch.
pub type WatchId = u64;

/// An operation against the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Operation {
    Create {
        path: String,
        data: Bytes,
        mode: CreateMode,
    },
    Get {
        path: String,
        watch: bool,
    },
    Exists {
        path: String,
        watch: bool,
    },
    Set {
        path: String,
        data: Bytes,
        expected_version: Option<i32>,
    },
    Delete {
        path: String,
        expected_version: Option<i32>,
    },
    Children {
        path: String,
        watch: bool,
    },
}

/// The successful result of an [`Operation`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Reply {
    Created,
    Data {
        data: Bytes,
        stat: Stat,
        watch: Option<WatchId>,
    },
    Exists {
        stat: Option<Stat>,
        watch: Option<WatchId>,
    },
    Stat(Stat),
    Deleted,
    Children {
        children: Vec<String>,
        watch: Option<WatchId>,
    },
}

impl Reply {
    /// The watch registered alongside this reply.
    #[must_use]
    pub const fn watch(&self) -> Option<WatchId> {
        match self {
            Self::Data { watch, .. } | Self::Exists { watch, .. } | Self::Children { watch, .. } => {
                *watch
            }
            Self::Created | Self::Stat(_) | Self::Deleted => None,
        }
    }
}

/// A failed [`Operation`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Classification of the failure.
    pub code: ResultCode,

    /// Description from the store.
    pub message: String,
}

/// Messages sent by clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Opens a new session, or resumes `session`. Always the first frame.
    Connect {
        /// Session to resume.
        session: Option<SessionId>,

        /// How long the server keeps the session without a connection.
        timeout_ms: u64,
    },

    /// Issues an operation.
    Request {
        /// Echoed back in the response.
        id: u64,

        /// The operation.
        op: Operation,
    },

    /// Ends the session.
    Close,
}

/// Messages sent by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// The session is attached to this connection.
    Connected {
        /// The session id, fresh or resumed.
        session: SessionId,
    },

    /// The session to resume no longer exists.
    SessionExpired,

    /// The outcome of a request.
    Response {
        /// The request id.
        id: u64,

        /// The outcome.
        result: std::result::Result<Reply, RemoteError>,
    },

    /// A watch registered by this session fired.
    WatchFired {
        /// The watch that fired.
        watch: WatchId,

        /// What happened.
        event: WatchEvent,
    },
}

/// Encodes a message into a frame payload.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Decodes a frame payload.
///
/// # Errors
///
/// Returns an error if the payload is not a valid message.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_watch() {
        let reply = Reply::Exists {
            stat: None,
            watch: Some(7),
        };
        assert_eq!(reply.watch(), Some(7));
        assert_eq!(Reply::Created.watch(), None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode::<ClientMessage>(b"{\"Nope\":1}").is_err());
    }
}
