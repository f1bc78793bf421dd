//! Error types for process supervision.

use thiserror::Error;

/// Result type for supervision operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising a process.
#[derive(Debug, Error)]
pub enum Error {
    /// The supervised process is already running.
    #[error("process {0} is already running")]
    AlreadyRunning(String),

    /// The command has no program.
    #[error("empty command")]
    EmptyCommand,

    /// The wait was interrupted by shutdown.
    #[error("interrupted by shutdown")]
    Interrupted,

    /// No process has been started yet.
    #[error("no process has been started")]
    NotStarted,

    /// Failed to spawn a process.
    #[error("failed to spawn process: {0}")]
    SpawnProcess(String),
}
