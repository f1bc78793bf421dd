use std::collections::BTreeMap;
use std::fmt::Debug;
use std::net::IpAddr;
use std::path::PathBuf;

use async_trait::async_trait;

/// Everything a backend needs to create one container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Container name.
    pub name: String,

    /// Image to run.
    pub image: String,

    /// Environment of the container.
    pub environment: BTreeMap<String, String>,

    /// Boot command line, the broker invocation.
    pub command: Vec<String>,

    /// Host paths to mount.
    pub mounts: Vec<PathBuf>,

    /// Ports to expose.
    pub ports: Vec<u16>,

    /// Network to attach to.
    pub network: Option<String>,
}

/// What a backend reports about a container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Inspection {
    /// Whether the container is running.
    pub running: bool,

    /// Address of the container, once assigned.
    pub ip: Option<IpAddr>,
}

/// Launches and controls containers.
#[async_trait]
pub trait ContainerBackend
where
    Self: Send + Sync + 'static,
{
    /// The error type for backend operations.
    type Error: Debug + std::error::Error + Send + Sync + 'static;

    /// Identifies a created container.
    type Handle: Clone + Debug + Send + Sync + 'static;

    /// Creates a container without starting it.
    async fn create(&self, spec: LaunchSpec) -> Result<Self::Handle, Self::Error>;

    /// Starts a created container.
    async fn start(&self, handle: &Self::Handle) -> Result<(), Self::Error>;

    /// Stops a running container.
    async fn stop(&self, handle: &Self::Handle) -> Result<(), Self::Error>;

    /// Stops and starts a container again.
    async fn restart(&self, handle: &Self::Handle) -> Result<(), Self::Error>;

    /// Removes a container.
    async fn delete(&self, handle: &Self::Handle) -> Result<(), Self::Error>;

    /// Reports the state of a container.
    async fn inspect(&self, handle: &Self::Handle) -> Result<Inspection, Self::Error>;
}
