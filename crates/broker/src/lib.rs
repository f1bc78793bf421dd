//! The per-container broker: registers the container's service, waits for
//! its dependencies, runs its process and reports status back to the store.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod args;
mod broker;
mod error;
mod lifecycle;
mod pool;
mod shutdown;
mod tracker;

pub use args::BrokerArgs;
pub use broker::{Broker, BrokerOptions, decode_descriptor, event_for};
pub use error::{Error, Result};
pub use lifecycle::{BrokerEvent, BrokerState, DependencyView, Lifecycle, Transition, transition};
pub use pool::WorkerPool;
pub use shutdown::ShutdownSignal;
pub use tracker::{DependencyEntry, EntryState, ServiceDependencyTracker};
