//! Prepares an application namespace, launches its containers and tears it
//! down again.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod backend;
mod coordinator;
mod deployment;
mod error;
mod local;

pub use backend::{ContainerBackend, Inspection, LaunchSpec};
pub use coordinator::{MasterCoordinator, MasterOptions, NodeProgress};
pub use deployment::{Deployment, DeploymentOptions};
pub use error::{Error, LocalBackendError, Result};
pub use local::{LocalBackend, LocalBackendOptions, LocalHandle};
