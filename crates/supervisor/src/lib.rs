//! Spawns a single service process, judges when it is ready, and stops it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod readiness;
mod state;
mod supervisor;

pub use error::{Error, Result};
pub use readiness::{
    DEFAULT_CONTROL_TOKEN, ProbeOptions, Readiness, match_control_token, probe_socket,
};
pub use state::{ProcessState, next_state};
pub use supervisor::{ExitReport, ProcessCommand, ProcessSupervisor, Snapshot, SupervisorOptions};
