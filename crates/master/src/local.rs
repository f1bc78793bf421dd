use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use convoy_supervisor::{ProcessCommand, ProcessSupervisor, Readiness, SupervisorOptions};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::{ContainerBackend, Inspection, LaunchSpec};
use crate::error::LocalBackendError;

/// Options for creating a [`LocalBackend`].
#[derive(Clone, Debug)]
pub struct LocalBackendOptions {
    /// Program started for every container, usually the `convoy` binary.
    pub program: String,

    /// How long a stopped broker may take before it is killed.
    pub stop_grace: Duration,

    /// Cancelling this token stops every container.
    pub shutdown_token: CancellationToken,
}

/// Handle of a container run by a [`LocalBackend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalHandle(u64);

struct LocalContainer {
    spec: LaunchSpec,
    supervisor: ProcessSupervisor,
}

/// Runs each container's broker as a child process of this host.
///
/// Images, mounts and networks are ignored; every container shares the
/// loopback address.
pub struct LocalBackend {
    program: String,
    stop_grace: Duration,
    shutdown_token: CancellationToken,
    next_id: AtomicU64,
    containers: Mutex<HashMap<u64, LocalContainer>>,
}

impl LocalBackend {
    /// Creates a backend without containers.
    #[must_use]
    pub fn new(
        LocalBackendOptions {
            program,
            stop_grace,
            shutdown_token,
        }: LocalBackendOptions,
    ) -> Self {
        Self {
            program,
            stop_grace,
            shutdown_token,
            next_id: AtomicU64::new(1),
            containers: Mutex::new(HashMap::new()),
        }
    }

    fn supervisor(&self, handle: LocalHandle) -> Result<ProcessSupervisor, LocalBackendError> {
        self.containers
            .lock()
            .get(&handle.0)
            .map(|container| container.supervisor.clone())
            .ok_or(LocalBackendError::UnknownHandle(handle.0))
    }
}

#[async_trait]
impl ContainerBackend for LocalBackend {
    type Error = LocalBackendError;
    type Handle = LocalHandle;

    async fn create(&self, spec: LaunchSpec) -> Result<LocalHandle, LocalBackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let supervisor = ProcessSupervisor::new(SupervisorOptions {
            name: spec.name.clone(),
            readiness: Readiness::Immediate,
            stop_command: None,
            stop_grace: self.stop_grace,
            shutdown_token: self.shutdown_token.child_token(),
        });

        debug!("created local container {} as {id}", spec.name);
        self.containers
            .lock()
            .insert(id, LocalContainer { spec, supervisor });

        Ok(LocalHandle(id))
    }

    async fn start(&self, handle: &LocalHandle) -> Result<(), LocalBackendError> {
        let containers = self.containers.lock();
        let container = containers
            .get(&handle.0)
            .ok_or(LocalBackendError::UnknownHandle(handle.0))?;
        if container.supervisor.snapshot().running {
            return Ok(());
        }

        let command = container
            .spec
            .command
            .iter()
            .fold(ProcessCommand::new(self.program.clone()), |command, arg| {
                command.arg(arg.clone())
            })
            .envs(container.spec.environment.clone());
        let pid = container.supervisor.start(&command)?;
        info!("started broker of {} with pid {pid}", container.spec.name);

        Ok(())
    }

    async fn stop(&self, handle: &LocalHandle) -> Result<(), LocalBackendError> {
        let supervisor = self.supervisor(*handle)?;
        supervisor.stop().await?;
        Ok(())
    }

    async fn restart(&self, handle: &LocalHandle) -> Result<(), LocalBackendError> {
        self.stop(handle).await?;
        self.start(handle).await
    }

    async fn delete(&self, handle: &LocalHandle) -> Result<(), LocalBackendError> {
        let container = self
            .containers
            .lock()
            .remove(&handle.0)
            .ok_or(LocalBackendError::UnknownHandle(handle.0))?;

        container.supervisor.stop().await?;
        container.supervisor.shutdown().await;
        debug!("deleted local container {}", container.spec.name);

        Ok(())
    }

    async fn inspect(&self, handle: &LocalHandle) -> Result<Inspection, LocalBackendError> {
        let running = self.supervisor(*handle)?.snapshot().running;

        Ok(Inspection {
            running,
            ip: running.then_some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        })
    }
}
