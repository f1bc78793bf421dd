use std::time::Duration;

use convoy_coordination::CoordinationClient;
use convoy_descriptor::{Application, ContainerDescriptor};
use tracing::{error, info, warn};

use crate::backend::{ContainerBackend, LaunchSpec};
use crate::coordinator::MasterCoordinator;
use crate::error::{Error, Result};

/// Options for creating a [`Deployment`].
#[derive(Clone, Debug)]
pub struct DeploymentOptions {
    /// Coordination hosts handed to every broker.
    pub hosts: Vec<String>,

    /// Session timeout handed to every broker.
    pub session_timeout: Duration,

    /// Network the containers join.
    pub network: Option<String>,

    /// How long teardown waits for brokers to deregister.
    pub drain_timeout: Duration,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:2181".to_string()],
            session_timeout: Duration::from_secs(10),
            network: None,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// One application deployed through a backend.
pub struct Deployment<C: CoordinationClient, B: ContainerBackend> {
    master: MasterCoordinator<C>,
    backend: B,
    application: Application,
    options: DeploymentOptions,
    launched: Vec<(String, B::Handle)>,
}

impl<C: CoordinationClient, B: ContainerBackend> Deployment<C, B> {
    /// Prepares the deployment of `application`.
    pub const fn new(
        master: MasterCoordinator<C>,
        backend: B,
        application: Application,
        options: DeploymentOptions,
    ) -> Self {
        Self {
            master,
            backend,
            application,
            options,
            launched: Vec::new(),
        }
    }

    /// The master of this deployment.
    pub const fn master(&self) -> &MasterCoordinator<C> {
        &self.master
    }

    /// The backend running the containers.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// The handle of a launched container.
    pub fn handle(&self, name: &str) -> Option<&B::Handle> {
        self.launched
            .iter()
            .find(|(launched, _)| launched == name)
            .map(|(_, handle)| handle)
    }

    /// Validates the application, creates its namespace, publishes every
    /// descriptor and launches the containers in boot order.
    ///
    /// # Errors
    ///
    /// Returns an error if the application is invalid, the namespace cannot
    /// be created, or a container cannot be launched. Nothing is touched for
    /// an invalid application.
    pub async fn deploy(&mut self) -> Result<()> {
        let order: Vec<ContainerDescriptor> = self
            .application
            .boot_order()?
            .into_iter()
            .cloned()
            .collect();
        info!(
            "deploying {} in order {:?}",
            self.application.name,
            order.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
        );

        self.master.create_namespace().await?;
        self.master.wait_ready().await?;

        for descriptor in &order {
            self.master.publish_container(descriptor).await?;
        }

        for descriptor in &order {
            let handle = self
                .backend
                .create(self.launch_spec(descriptor))
                .await
                .map_err(Error::backend)?;
            self.launched.push((descriptor.name.clone(), handle.clone()));
            self.backend.start(&handle).await.map_err(Error::backend)?;

            let inspection = self.backend.inspect(&handle).await.map_err(Error::backend)?;
            match inspection.ip {
                Some(ip) => {
                    self.master.update_container_ip(&descriptor.name, ip).await?;
                }
                None => warn!("{} has no address yet", descriptor.name),
            }
        }

        info!("{} deployed", self.application.name);
        Ok(())
    }

    /// The launch request for one container.
    #[must_use]
    pub fn launch_spec(&self, descriptor: &ContainerDescriptor) -> LaunchSpec {
        let layout = self.master.layout();
        let timeout_ms = u64::try_from(self.options.session_timeout.as_millis()).unwrap_or(u64::MAX);

        LaunchSpec {
            name: descriptor.name.clone(),
            image: descriptor.image.clone(),
            environment: descriptor.environment(),
            command: vec![
                "broker".to_string(),
                self.options.hosts.join(","),
                timeout_ms.to_string(),
                layout.container_path(descriptor.kind(), &descriptor.name),
                layout.services_root(),
                layout.shutdown_path(),
                layout.conf_root(),
            ],
            mounts: Vec::new(),
            ports: descriptor.start.port.into_iter().collect(),
            network: self.options.network.clone(),
        }
    }

    /// Restarts one container after it failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the container was never launched or the backend
    /// fails.
    pub async fn restart(&self, name: &str) -> Result<()> {
        let handle = self
            .handle(name)
            .ok_or_else(|| Error::UnknownContainer(name.to_string()))?;

        self.backend.restart(handle).await.map_err(Error::backend)?;
        info!("restarted {name}");
        Ok(())
    }

    /// Waits until someone signals shutdown of the application.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown node cannot be watched.
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        self.master.wait_for_shutdown().await
    }

    /// Signals shutdown, waits for the brokers to deregister, removes the
    /// containers and the namespace, and ends the master session.
    ///
    /// # Errors
    ///
    /// Returns the first error; later steps still run.
    pub async fn teardown(&mut self) -> Result<()> {
        let mut first = None;
        let mut keep = |result: Result<()>| {
            if let Err(err) = result {
                error!("teardown step failed: {err}");
                first.get_or_insert(err);
            }
        };

        keep(self.master.signal_shutdown().await);

        match tokio::time::timeout(
            self.options.drain_timeout,
            self.master.wait_for_services_drained(),
        )
        .await
        {
            Ok(result) => keep(result),
            Err(_) => warn!("brokers still registered after {:?}", self.options.drain_timeout),
        }

        while let Some((name, handle)) = self.launched.pop() {
            keep(self.backend.stop(&handle).await.map_err(Error::backend));
            keep(self.backend.delete(&handle).await.map_err(Error::backend));
            info!("removed {name}");
        }

        keep(self.master.clean_namespace().await.map(|_| ()));
        keep(self.master.close().await);

        first.map_or(Ok(()), Err)
    }
}
