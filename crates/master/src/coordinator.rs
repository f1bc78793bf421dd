use std::collections::HashMap;
use std::net::IpAddr;

use bytes::Bytes;
use convoy_coordination::{
    CoordinationClient, CreateMode, CreateOutcome, Outcome, RetryPolicy, WatchEvent,
    create_or_verify, delete_recursive,
};
use convoy_descriptor::{ContainerDescriptor, ContainerKind};
use convoy_naming::Layout;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Options for creating a [`MasterCoordinator`].
#[derive(Clone, Debug)]
pub struct MasterOptions {
    /// Application root.
    pub root: String,

    /// Connection-loss retry policy.
    pub retry: RetryPolicy,
}

/// Creation progress of a namespace node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeProgress {
    /// Requested but not confirmed.
    NotInitialized,

    /// Created or verified.
    Initialized,
}

/// Owns the namespace of one application.
pub struct MasterCoordinator<C: CoordinationClient> {
    client: C,
    layout: Layout,
    retry: RetryPolicy,
    progress: Mutex<HashMap<String, NodeProgress>>,
    published: Mutex<HashMap<String, ContainerKind>>,
    ready: watch::Sender<bool>,
}

impl<C: CoordinationClient> MasterCoordinator<C> {
    /// Creates a master speaking through `client`.
    pub fn new(client: C, MasterOptions { root, retry }: MasterOptions) -> Self {
        let (ready, _) = watch::channel(false);

        Self {
            client,
            layout: Layout::new(root),
            retry,
            progress: Mutex::new(HashMap::new()),
            published: Mutex::new(HashMap::new()),
            ready,
        }
    }

    /// The namespace layout.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The client this master speaks through.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Progress of one namespace node, if it is tracked.
    #[must_use]
    pub fn progress(&self, path: &str) -> Option<NodeProgress> {
        self.progress.lock().get(path).copied()
    }

    /// Whether every namespace node has been created.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Creates the persistent nodes of the namespace.
    ///
    /// Nodes left over from an earlier run are accepted as they are, except
    /// a stale shutdown node, which is removed so new brokers do not shut
    /// down straight away.
    ///
    /// # Errors
    ///
    /// Returns an error if a node cannot be created or verified.
    pub async fn create_namespace(&self) -> Result<()> {
        let paths = self.layout.namespace_paths();
        {
            let mut progress = self.progress.lock();
            for path in &paths {
                progress.insert(path.clone(), NodeProgress::NotInitialized);
            }
        }
        self.ready.send_replace(false);

        let client = &self.client;
        let shutdown_path = self.layout.shutdown_path();
        let shutdown = shutdown_path.as_str();
        if let Outcome::Done(()) = self
            .retry
            .run("delete", move || client.delete(shutdown, None))
            .await
            .map_err(Error::coordination)?
        {
            warn!("removed stale shutdown node {shutdown}");
        }

        let empty = Bytes::new();
        for path in &paths {
            let outcome = create_or_verify(
                &self.client,
                &self.retry,
                path,
                &empty,
                CreateMode::Persistent,
            )
            .await
            .map_err(Error::coordination)?;

            match outcome {
                CreateOutcome::Created => debug!("created {path}"),
                CreateOutcome::AlreadyPresent => debug!("{path} already present"),
            }
            self.mark_initialized(path);
        }

        Ok(())
    }

    fn mark_initialized(&self, path: &str) {
        let all_initialized = {
            let mut progress = self.progress.lock();
            progress.insert(path.to_string(), NodeProgress::Initialized);
            progress
                .values()
                .all(|progress| *progress == NodeProgress::Initialized)
        };

        if all_initialized && !self.ready.send_replace(true) {
            info!("master ready at {}", self.layout.root());
        }
    }

    /// Waits until [`create_namespace`](Self::create_namespace) has finished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if the master is dropped first.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut ready = self.ready.subscribe();
        ready
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| Error::Interrupted)
    }

    /// Publishes a container descriptor as an ephemeral node of this
    /// session.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be encoded or created.
    pub async fn publish_container(&self, descriptor: &ContainerDescriptor) -> Result<String> {
        let path = self
            .layout
            .container_path(descriptor.kind(), &descriptor.name);
        let data = descriptor.to_bytes()?;

        create_or_verify(
            &self.client,
            &self.retry,
            &path,
            &data,
            CreateMode::Ephemeral,
        )
        .await
        .map_err(Error::coordination)?;

        self.published
            .lock()
            .insert(descriptor.name.clone(), descriptor.kind());
        info!("published {} at {path}", descriptor.name);
        Ok(path)
    }

    /// Records the address of a running container in its descriptor.
    ///
    /// The write is a compare-and-set against the version read; a lost race
    /// is retried against the newer version.
    ///
    /// # Errors
    ///
    /// Returns an error if the container was not published by this master,
    /// its node is gone, or the write fails.
    pub async fn update_container_ip(&self, name: &str, ip: IpAddr) -> Result<ContainerDescriptor> {
        let kind = self
            .published
            .lock()
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownContainer(name.to_string()))?;
        let capabilities = kind.capabilities();
        let path = self.layout.container_path(kind, name);
        let client = &self.client;
        let node = path.as_str();

        loop {
            let Outcome::Done((data, stat)) = self
                .retry
                .run("get", move || client.get(node))
                .await
                .map_err(Error::coordination)?
            else {
                return Err(Error::MissingNode(path.clone()));
            };

            let mut descriptor = (capabilities.deserialize)(&data)?;
            if descriptor.ip == Some(ip) {
                return Ok(descriptor);
            }
            (capabilities.update_ip)(&mut descriptor, ip);
            let updated = descriptor.to_bytes()?;

            let written = self
                .retry
                .run("set", move || {
                    client.set(node, updated.clone(), Some(stat.version))
                })
                .await;

            match written {
                Ok(Outcome::Done(_)) => {
                    info!("{name} is at {ip}");
                    return Ok(descriptor);
                }
                Ok(Outcome::NoNode | Outcome::NodeExists) => return Err(Error::MissingNode(path.clone())),
                Err(err) => {
                    let current = self
                        .retry
                        .run("exists", move || client.exists(node))
                        .await
                        .map_err(Error::coordination)?;

                    match current {
                        Outcome::Done(Some(current)) if current.version != stat.version => {
                            debug!("descriptor of {name} changed concurrently, retrying");
                        }
                        Outcome::Done(Some(_)) => return Err(Error::coordination(err)),
                        Outcome::Done(None) | Outcome::NoNode | Outcome::NodeExists => {
                            return Err(Error::MissingNode(path.clone()));
                        }
                    }
                }
            }
        }
    }

    /// Creates the shutdown node every broker watches.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be created.
    pub async fn signal_shutdown(&self) -> Result<()> {
        let path = self.layout.shutdown_path();

        create_or_verify(
            &self.client,
            &self.retry,
            &path,
            &Bytes::new(),
            CreateMode::Persistent,
        )
        .await
        .map_err(Error::coordination)?;

        info!("signaled shutdown at {path}");
        Ok(())
    }

    /// Waits until someone creates the shutdown node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if the session ends first.
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        let client = &self.client;
        let path = self.layout.shutdown_path();
        let shutdown = path.as_str();

        loop {
            let outcome = self
                .retry
                .run("exists", move || client.exists_watched(shutdown))
                .await
                .map_err(Error::coordination)?;

            let Outcome::Done((stat, watch)) = outcome else {
                continue;
            };
            if stat.is_some() {
                return Ok(());
            }
            if watch.fired().await == WatchEvent::SessionClosed {
                return Err(Error::Interrupted);
            }
        }
    }

    /// Waits until no service is registered any more.
    ///
    /// # Errors
    ///
    /// Returns an error if the naming root cannot be watched.
    pub async fn wait_for_services_drained(&self) -> Result<()> {
        let client = &self.client;
        let path = self.layout.services_root();
        let services = path.as_str();

        loop {
            let outcome = self
                .retry
                .run("children", move || client.children_watched(services))
                .await
                .map_err(Error::coordination)?;

            let Outcome::Done((children, watch)) = outcome else {
                return Ok(());
            };
            if children.is_empty() {
                return Ok(());
            }
            debug!("waiting for {} services to deregister", children.len());
            if watch.fired().await == WatchEvent::SessionClosed {
                return Err(Error::Interrupted);
            }
        }
    }

    /// Removes the whole namespace, children first.
    ///
    /// # Errors
    ///
    /// Returns an error if a node cannot be removed.
    pub async fn clean_namespace(&self) -> Result<usize> {
        let deleted = delete_recursive(&self.client, &self.retry, self.layout.root())
            .await
            .map_err(Error::coordination)?;

        self.progress.lock().clear();
        self.published.lock().clear();
        self.ready.send_replace(false);
        info!("removed {deleted} nodes under {}", self.layout.root());

        Ok(deleted)
    }

    /// Ends the master session, removing the published descriptors.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be closed.
    pub async fn close(&self) -> Result<()> {
        self.client.close().await.map_err(Error::coordination)
    }
}
