//! Container descriptors, per-kind capabilities, environment composition and
//! application validation.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod application;
mod descriptor;
mod environment;
mod error;

pub use application::Application;
pub use descriptor::{
    Capabilities, ContainerDescriptor, ContainerKind, KindSettings, ProcessSpec, ReadinessSpec,
};
pub use environment::{Environment, compose, dependency_prefix, env_key};
pub use error::{Error, Result};
