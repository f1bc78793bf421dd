//! Abstract interface for a hierarchical coordination store with versioned
//! nodes, ephemeral registration and one-shot watches.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod helpers;
mod path;
mod retry;
mod watch;

pub use error::OperationError;
pub use helpers::{CreateOutcome, create_or_verify, delete_recursive, list_recursive, upsert};
pub use path::{basename, join, parent, validate};
pub use retry::{Disposition, Outcome, RetryPolicy, classify};
pub use watch::{Watch, WatchEvent, WatchTrigger, watch_pair};

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifier of a client session with the coordination store.
pub type SessionId = u64;

/// Classification of the outcome of a single coordination operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// The operation succeeded.
    Ok,

    /// The connection was lost before the outcome was known. The same request
    /// must be issued again; program state is never changed by this code.
    ConnectionLoss,

    /// The addressed node (or its parent, for creates) does not exist.
    NoNode,

    /// A node already exists at the addressed path.
    NodeExists,

    /// Anything else. Fatal for the caller awaiting this operation.
    OtherError,
}

impl ResultCode {
    /// Classifies a finished operation.
    pub fn of<T, E: CoordinationError>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(err) => err.code(),
        }
    }
}

/// Marker trait for coordination client errors.
pub trait CoordinationError: Debug + Error + Send + Sync + 'static {
    /// The result code this error maps to.
    fn code(&self) -> ResultCode;
}

/// How a node is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateMode {
    /// The node outlives the session that created it.
    Persistent,

    /// The node is removed when the creating session ends.
    Ephemeral,
}

/// Metadata of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Optimistic-concurrency token, incremented on every successful `set`.
    pub version: i32,

    /// Owning session for ephemeral nodes.
    pub ephemeral_owner: Option<SessionId>,

    /// Number of direct children.
    pub num_children: usize,
}

/// A connected session with a coordination store.
///
/// All paths are absolute and `/`-delimited. Watches are one-shot: a fired
/// watch is gone and must be registered again for continued monitoring.
#[async_trait]
pub trait CoordinationClient: Clone + Send + Sync + 'static {
    /// The error type for coordination operations.
    type Error: CoordinationError;

    /// The session this client speaks for.
    fn session_id(&self) -> SessionId;

    /// Creates a node holding `data`.
    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<(), Self::Error>;

    /// Reads a node.
    async fn get(&self, path: &str) -> Result<(Bytes, Stat), Self::Error>;

    /// Reads a node and leaves a watch for its next change or deletion.
    async fn get_watched(&self, path: &str) -> Result<(Bytes, Stat, Watch), Self::Error>;

    /// Checks whether a node exists.
    async fn exists(&self, path: &str) -> Result<Option<Stat>, Self::Error>;

    /// Checks whether a node exists and leaves a watch for its creation,
    /// change or deletion.
    async fn exists_watched(&self, path: &str) -> Result<(Option<Stat>, Watch), Self::Error>;

    /// Replaces the data of a node. With `expected_version` set the write only
    /// happens if the node is still at that version.
    async fn set(
        &self,
        path: &str,
        data: Bytes,
        expected_version: Option<i32>,
    ) -> Result<Stat, Self::Error>;

    /// Deletes a childless node, optionally only at `expected_version`.
    async fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<(), Self::Error>;

    /// Lists the names of the direct children of a node.
    async fn children(&self, path: &str) -> Result<Vec<String>, Self::Error>;

    /// Lists the children of a node and leaves a watch for membership changes.
    async fn children_watched(&self, path: &str) -> Result<(Vec<String>, Watch), Self::Error>;

    /// Ends the session. Ephemeral nodes owned by it are removed and pending
    /// watches resolve with [`WatchEvent::SessionClosed`].
    async fn close(&self) -> Result<(), Self::Error>;
}
