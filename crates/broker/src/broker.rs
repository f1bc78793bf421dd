use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use convoy_coordination::{
    CoordinationClient, CreateMode, CreateOutcome, OperationError, Outcome, RetryPolicy, Watch,
    WatchEvent, basename, create_or_verify, join, parent, upsert,
};
use convoy_descriptor::{ContainerDescriptor, ContainerKind, KindSettings, ReadinessSpec, compose};
use convoy_naming::{NamingService, ServiceRecord, ServiceStatus};
use convoy_supervisor::{
    DEFAULT_CONTROL_TOKEN, ProbeOptions, ProcessCommand, ProcessState, ProcessSupervisor,
    Readiness, SupervisorOptions,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::lifecycle::{BrokerEvent, BrokerState, DependencyView, Lifecycle};
use crate::pool::WorkerPool;
use crate::shutdown::ShutdownSignal;
use crate::tracker::ServiceDependencyTracker;

const TEARDOWN_ATTEMPTS: u32 = 5;

/// Options for creating a [`Broker`].
#[derive(Clone, Debug)]
pub struct BrokerOptions {
    /// Descriptor node of this container.
    pub node_path: String,

    /// Naming service root.
    pub naming_root: String,

    /// Node whose creation shuts the broker down.
    pub shutdown_path: String,

    /// Root of the post-boot configuration copies.
    pub conf_root: String,

    /// Directory for the local configuration copy, if any.
    pub conf_dir: Option<PathBuf>,

    /// Size of the worker pool.
    pub workers: usize,

    /// Connection-loss retry policy.
    pub retry: RetryPolicy,

    /// Timing of socket readiness probes.
    pub probe: ProbeOptions,

    /// Default marker for output token readiness.
    pub control_token: String,

    /// How long a stopped process may take before it is killed.
    pub stop_grace: Duration,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            node_path: String::new(),
            naming_root: String::new(),
            shutdown_path: String::new(),
            conf_root: String::new(),
            conf_dir: None,
            workers: 4,
            retry: RetryPolicy::default(),
            probe: ProbeOptions::default(),
            control_token: DEFAULT_CONTROL_TOKEN.to_string(),
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// The lifecycle event a freshly read service record stands for.
///
/// `previous` is `None` the first time the record is seen.
#[must_use]
pub const fn event_for(previous: Option<ServiceStatus>, current: ServiceStatus) -> BrokerEvent {
    match (previous, current) {
        (_, ServiceStatus::NotRunning) => BrokerEvent::SrvNotRunning,
        (None, _) => BrokerEvent::SrvAdded,
        (Some(_), ServiceStatus::Initialized) => BrokerEvent::SrvInitialized,
        (Some(_), ServiceStatus::NotInitialized) => BrokerEvent::SrvNotInitialized,
        (Some(_), ServiceStatus::Updated) => BrokerEvent::SrvUpdated,
    }
}

/// Decodes the descriptor stored at `path`, using the capability table of the
/// kind named by the parent node when there is one.
///
/// # Errors
///
/// Returns an error if the data is not a descriptor of that kind.
pub fn decode_descriptor(path: &str, data: &Bytes) -> Result<ContainerDescriptor> {
    let kind = parent(path).map(basename).and_then(|segment| {
        ContainerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == segment)
    });

    let descriptor = match kind {
        Some(kind) => (kind.capabilities().deserialize)(data)?,
        None => ContainerDescriptor::try_from(data.clone())?,
    };
    Ok(descriptor)
}

fn without_address(descriptor: &ContainerDescriptor) -> ContainerDescriptor {
    let mut descriptor = descriptor.clone();
    descriptor.ip = None;
    if let KindSettings::Web { public_url, .. } = &mut descriptor.settings {
        *public_url = None;
    }
    descriptor
}

struct Running {
    supervisor: ProcessSupervisor,
    token: CancellationToken,
}

struct Inner<C: CoordinationClient> {
    client: C,
    name: String,
    node_path: String,
    service_path: String,
    conf_root: String,
    conf_dir: Option<PathBuf>,
    retry: RetryPolicy,
    probe: ProbeOptions,
    control_token: String,
    stop_grace: Duration,
    naming: NamingService,
    lifecycle: Lifecycle,
    tracker: OnceLock<ServiceDependencyTracker>,
    descriptor: Mutex<Option<ContainerDescriptor>>,
    running: Mutex<Option<Running>>,
    shutdown: ShutdownSignal,
    pool: WorkerPool,
    task_tracker: TaskTracker,
    interrupt: CancellationToken,
    superseded: Arc<Mutex<CancellationToken>>,
    token: CancellationToken,
}

/// Boots, runs and shuts down one container.
pub struct Broker<C: CoordinationClient> {
    inner: Arc<Inner<C>>,
    commands: mpsc::UnboundedReceiver<BrokerState>,
}

impl<C: CoordinationClient> Broker<C> {
    /// Creates a broker speaking through `client`.
    ///
    /// Cancelling `shutdown_token` stops the broker as if the shutdown node
    /// had been created.
    pub fn new(
        client: C,
        BrokerOptions {
            node_path,
            naming_root,
            shutdown_path,
            conf_root,
            conf_dir,
            workers,
            retry,
            probe,
            control_token,
            stop_grace,
        }: BrokerOptions,
        shutdown_token: &CancellationToken,
    ) -> Self {
        let name = basename(&node_path).to_string();
        let naming = NamingService::new(naming_root);
        let service_path = naming.resolve_service_path(&name);
        let token = shutdown_token.child_token();
        let interrupt = token.child_token();
        let superseded = Arc::new(Mutex::new(CancellationToken::new()));

        let (sender, commands) = mpsc::unbounded_channel();
        let lifecycle = Lifecycle::new(name.clone());
        for state in BrokerState::ALL {
            let sender = sender.clone();
            let interrupt = (state == BrokerState::Shutdown).then(|| interrupt.clone());
            // Entering ERROR or UPDATE cuts a launch in progress short.
            let superseded = matches!(state, BrokerState::Error | BrokerState::Update)
                .then(|| superseded.clone());
            lifecycle.bind(state, move || {
                if let Some(interrupt) = &interrupt {
                    interrupt.cancel();
                }
                if let Some(superseded) = &superseded {
                    superseded.lock().cancel();
                }
                if sender.send(state).is_err() {
                    debug!("broker gone, dropping {state} action");
                }
            });
        }

        Self {
            inner: Arc::new(Inner {
                client,
                name,
                node_path,
                service_path,
                conf_root,
                conf_dir,
                retry,
                probe,
                control_token,
                stop_grace,
                naming,
                lifecycle,
                tracker: OnceLock::new(),
                descriptor: Mutex::new(None),
                running: Mutex::new(None),
                shutdown: ShutdownSignal::new(shutdown_path, token.clone()),
                pool: WorkerPool::new(workers),
                task_tracker: TaskTracker::new(),
                interrupt,
                superseded,
                token,
            }),
            commands,
        }
    }

    /// Name of the container, and of the service it offers.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Node the service record is published at.
    #[must_use]
    pub fn service_path(&self) -> &str {
        &self.inner.service_path
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BrokerState {
        self.inner.lifecycle.state()
    }

    /// Latch released when the shutdown node appears.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.inner.shutdown.clone()
    }

    /// Runs the broker until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot boot. Failures after boot put
    /// the broker into [`BrokerState::Error`] instead.
    pub async fn run(self) -> Result<()> {
        let Self {
            inner,
            mut commands,
        } = self;

        inner.lifecycle.boot()?;

        let result = loop {
            let state = tokio::select! {
                () = inner.token.cancelled() => break Ok(()),
                state = commands.recv() => match state {
                    Some(state) => state,
                    None => break Ok(()),
                },
            };

            let step = match state {
                BrokerState::Boot => inner.on_boot().await,
                BrokerState::Init => inner.on_init(),
                BrokerState::Start => inner.launch(ServiceStatus::Initialized).await,
                BrokerState::Update => inner.on_update().await,
                BrokerState::Error => inner.on_error().await,
                BrokerState::Shutdown => break Ok(()),
            };

            match (state, step) {
                (_, Ok(())) => {}
                (_, Err(Error::Interrupted)) => break Ok(()),
                (BrokerState::Boot, Err(err)) => {
                    error!("{} failed to boot: {err}", inner.name);
                    break Err(err);
                }
                (BrokerState::Error, Err(err)) => {
                    error!("{} failed to report its error: {err}", inner.name);
                }
                (state, Err(err)) => {
                    error!("{} failed in {state}: {err}", inner.name);
                    inner.apply(BrokerEvent::Error);
                }
            }
        };

        inner.finish().await;
        result
    }
}

impl<C: CoordinationClient> Inner<C> {
    fn tracker(&self) -> Option<&ServiceDependencyTracker> {
        self.tracker.get()
    }

    fn apply(&self, event: BrokerEvent) {
        let tracker = self.tracker();
        self.lifecycle.apply(event, || {
            tracker.map_or(DependencyView::SATISFIED, ServiceDependencyTracker::view)
        });
    }

    async fn on_boot(self: &Arc<Self>) -> Result<()> {
        let client = &self.client;
        let node_path = self.node_path.as_str();

        let outcome = self
            .retry
            .run("get", move || client.get_watched(node_path))
            .await
            .map_err(Error::coordination)?;
        let Outcome::Done((data, _, watch)) = outcome else {
            return Err(Error::MissingDescriptor(self.node_path.clone()));
        };
        let descriptor = decode_descriptor(node_path, &data)?;
        info!(
            "{} booting as {} container with dependencies {:?}",
            self.name,
            descriptor.kind(),
            descriptor.dependencies
        );

        self.tracker.get_or_init(|| {
            ServiceDependencyTracker::new(
                self.naming.clone(),
                descriptor.dependencies.iter().cloned(),
            )
        });
        *self.descriptor.lock() = Some(descriptor);

        tokio::select! {
            () = self.interrupt.cancelled() => return Err(Error::Interrupted),
            registered = self.register() => registered?,
        }

        let inner = self.clone();
        self.task_tracker
            .spawn(async move { inner.watch_own_descriptor(watch).await });

        let inner = self.clone();
        self.task_tracker.spawn(async move {
            if let Err(err) = inner.shutdown.watch(&inner.client, &inner.retry).await {
                error!("{} lost its shutdown watch: {err}", inner.name);
            }
            if inner.shutdown.is_signaled_shutdown() {
                inner.apply(BrokerEvent::Shutdown);
            }
        });

        self.apply(BrokerEvent::ConInit);
        Ok(())
    }

    async fn register(&self) -> Result<()> {
        let record = ServiceRecord::new(self.node_path.clone(), ServiceStatus::NotInitialized);
        let data = self.naming.serialize_record(&record)?;

        match create_or_verify(
            &self.client,
            &self.retry,
            &self.service_path,
            &data,
            CreateMode::Ephemeral,
        )
        .await
        .map_err(Error::coordination)?
        {
            CreateOutcome::Created => info!("{} registered at {}", self.name, self.service_path),
            CreateOutcome::AlreadyPresent => {
                info!("{} already registered at {}", self.name, self.service_path);
            }
        }

        Ok(())
    }

    fn on_init(self: &Arc<Self>) -> Result<()> {
        let Some(tracker) = self.tracker() else {
            return Err(Error::MissingDescriptor(self.node_path.clone()));
        };

        if !tracker.has_dependencies() {
            self.apply(BrokerEvent::SrvNone);
            return Ok(());
        }

        for name in tracker.service_names() {
            let inner = self.clone();
            self.task_tracker
                .spawn(async move { inner.watch_dependency(name).await });
        }

        Ok(())
    }

    async fn on_update(self: &Arc<Self>) -> Result<()> {
        self.stop_process().await;
        self.launch(ServiceStatus::Updated).await
    }

    async fn on_error(&self) -> Result<()> {
        self.stop_process().await;
        self.publish(ServiceStatus::NotRunning).await
    }

    fn launching(&self) -> bool {
        matches!(
            self.lifecycle.state(),
            BrokerState::Start | BrokerState::Update
        )
    }

    async fn launch(self: &Arc<Self>, status: ServiceStatus) -> Result<()> {
        let superseded = CancellationToken::new();
        *self.superseded.lock() = superseded.clone();
        if !self.launching() {
            debug!("{} left {status:?} launch before it began", self.name);
            return Ok(());
        }

        let descriptor = self
            .descriptor
            .lock()
            .clone()
            .ok_or_else(|| Error::MissingDescriptor(self.node_path.clone()))?;

        self.write_conf_copy(&descriptor);

        let dependencies = self
            .tracker()
            .map(ServiceDependencyTracker::environments)
            .unwrap_or_default();
        let environment = compose(&descriptor.environment(), &dependencies);

        let mut command =
            ProcessCommand::from_argv(&descriptor.start.command)?.envs(environment.clone());
        if let Some(dir) = &descriptor.start.working_dir {
            command = command.working_dir(dir.clone());
        }
        let stop_command = descriptor.stop.as_ref().and_then(|stop| {
            ProcessCommand::from_argv(&stop.command)
                .ok()
                .map(|command| command.envs(environment.clone()))
        });

        let supervisor = ProcessSupervisor::new(SupervisorOptions {
            name: descriptor.name.clone(),
            readiness: self.readiness(&descriptor),
            stop_command,
            stop_grace: self.stop_grace,
            shutdown_token: self.token.child_token(),
        });
        let run_token = self.token.child_token();

        supervisor.start(&command)?;
        *self.running.lock() = Some(Running {
            supervisor: supervisor.clone(),
            token: run_token.clone(),
        });

        let state = tokio::select! {
            biased;
            () = self.interrupt.cancelled() => return Err(Error::Interrupted),
            () = superseded.cancelled() => {
                info!("{} launch superseded while starting", self.name);
                return Ok(());
            }
            state = supervisor.wait_for_initialization() => state?,
        };

        match state {
            ProcessState::Initialized if superseded.is_cancelled() || !self.launching() => {
                info!("{} initialized after leaving {}", self.name, self.lifecycle.state());
            }
            ProcessState::Initialized => {
                info!("{} initialized", self.name);
                self.publish(status).await?;
                self.watch_exit(supervisor, run_token);
            }
            state => {
                warn!("{} did not initialize ({state:?})", self.name);
                self.publish(ServiceStatus::NotInitialized).await?;
                self.apply(BrokerEvent::Error);
            }
        }

        Ok(())
    }

    fn readiness(&self, descriptor: &ContainerDescriptor) -> Readiness {
        match (&descriptor.start.readiness, descriptor.start.port) {
            (ReadinessSpec::Socket, Some(port)) => Readiness::Socket {
                addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
                options: self.probe,
            },
            (ReadinessSpec::OutputToken { token }, _) => Readiness::OutputToken {
                token: token.clone().unwrap_or_else(|| self.control_token.clone()),
            },
            (ReadinessSpec::Socket, None) => {
                warn!("{} declares socket readiness without a port", self.name);
                Readiness::Immediate
            }
            (ReadinessSpec::Immediate, _) => Readiness::Immediate,
        }
    }

    fn watch_exit(self: &Arc<Self>, supervisor: ProcessSupervisor, run_token: CancellationToken) {
        let inner = self.clone();
        self.task_tracker.spawn(async move {
            tokio::select! {
                biased;
                () = run_token.cancelled() => {}
                exit = supervisor.wait_proc() => {
                    if let Ok(exit) = exit {
                        error!("{} exited unexpectedly: {exit:?}", inner.name);
                        inner.apply(BrokerEvent::Error);
                    }
                }
            }
        });
    }

    async fn stop_process(&self) {
        let running = self.running.lock().take();
        let Some(Running { supervisor, token }) = running else {
            return;
        };

        token.cancel();
        if let Err(err) = supervisor.stop().await {
            warn!("failed to stop {}: {err}", self.name);
        }
        supervisor.shutdown().await;
    }

    async fn publish(&self, status: ServiceStatus) -> Result<()> {
        let record = ServiceRecord::new(self.node_path.clone(), status);
        let data = self.naming.serialize_record(&record)?;
        let client = &self.client;
        let path = self.service_path.as_str();
        let data = &data;

        loop {
            let updated = self
                .retry
                .run("set", move || client.set(path, data.clone(), None))
                .await
                .map_err(Error::coordination)?;
            if let Outcome::Done(_) = updated {
                break;
            }

            let created = self
                .retry
                .run("create", move || {
                    client.create(path, data.clone(), CreateMode::Ephemeral)
                })
                .await
                .map_err(Error::coordination)?;
            match created {
                Outcome::Done(()) => break,
                Outcome::NoNode => {
                    return Err(Error::coordination(
                        OperationError::<C::Error>::MissingParent(path.to_string()),
                    ));
                }
                Outcome::NodeExists => {}
            }
        }

        info!("{} published {status:?}", self.name);
        Ok(())
    }

    fn write_conf_copy(self: &Arc<Self>, descriptor: &ContainerDescriptor) {
        let data = match descriptor.to_bytes() {
            Ok(data) => data,
            Err(err) => {
                error!("failed to encode configuration of {}: {err}", self.name);
                return;
            }
        };
        let path = join(&self.conf_root, &descriptor.name);
        let file_name = descriptor.capabilities().conf_file_name(descriptor);

        let inner = self.clone();
        self.pool.spawn(async move {
            if let Err(err) = upsert(&inner.client, &inner.retry, &path, &data).await {
                warn!("failed to store configuration copy at {path}: {err}");
            }

            if let Some(dir) = &inner.conf_dir {
                let file = dir.join(file_name);
                match write_file(dir, &file, &data).await {
                    Ok(()) => debug!("wrote configuration copy to {}", file.display()),
                    Err(err) => warn!("{err}"),
                }
            }
        });
    }

    async fn watch_own_descriptor(self: Arc<Self>, mut watch: Watch) {
        let client = &self.client;
        let node_path = self.node_path.as_str();

        loop {
            let event = tokio::select! {
                () = self.token.cancelled() => return,
                event = watch.fired() => event,
            };

            match event {
                WatchEvent::SessionClosed => return,
                WatchEvent::NodeDeleted => {
                    info!("descriptor of {} was removed", self.name);
                    return;
                }
                WatchEvent::NodeCreated
                | WatchEvent::NodeDataChanged
                | WatchEvent::NodeChildrenChanged => {}
            }

            let outcome = tokio::select! {
                () = self.token.cancelled() => return,
                outcome = self.retry.run("get", move || client.get_watched(node_path)) => outcome,
            };

            match outcome {
                Ok(Outcome::Done((data, _, next))) => {
                    watch = next;
                    match decode_descriptor(node_path, &data) {
                        Ok(descriptor) => self.descriptor_changed(descriptor),
                        Err(err) => {
                            error!("{} received an unreadable descriptor: {err}", self.name);
                            self.apply(BrokerEvent::Error);
                        }
                    }
                }
                Ok(Outcome::NoNode | Outcome::NodeExists) => {
                    info!("descriptor of {} was removed", self.name);
                    return;
                }
                Err(err) => {
                    error!("{} lost its descriptor watch: {err}", self.name);
                    return;
                }
            }
        }
    }

    fn descriptor_changed(&self, descriptor: ContainerDescriptor) {
        let significant = {
            let mut current = self.descriptor.lock();
            let significant = current
                .as_ref()
                .is_none_or(|old| without_address(old) != without_address(&descriptor));
            *current = Some(descriptor);
            significant
        };

        if significant {
            self.apply(BrokerEvent::ConUpdated);
        } else {
            debug!("address of {} recorded", self.name);
        }
    }

    async fn watch_dependency(self: Arc<Self>, name: String) {
        let client = &self.client;
        let path = self.naming.resolve_service_path(&name);
        let service_path = path.as_str();
        let mut seen = false;

        loop {
            let outcome = tokio::select! {
                () = self.token.cancelled() => return,
                outcome = self.retry.run("get", move || client.get_watched(service_path)) => outcome,
            };

            let watch = match outcome {
                Ok(Outcome::Done((data, _, watch))) => {
                    let event = self
                        .pool
                        .run(self.process_record(&name, service_path, data, seen))
                        .await;
                    seen = true;
                    self.apply(event);
                    watch
                }
                Ok(Outcome::NoNode | Outcome::NodeExists) => {
                    let outcome = tokio::select! {
                        () = self.token.cancelled() => return,
                        outcome = self.retry.run("exists", move || client.exists_watched(service_path)) => outcome,
                    };

                    match outcome {
                        Ok(Outcome::Done((None, watch))) => {
                            if seen {
                                seen = false;
                                warn!("{name} is gone");
                                if let Some(tracker) = self.tracker() {
                                    tracker.set_remote_status(service_path, ServiceStatus::NotRunning);
                                }
                                self.apply(BrokerEvent::SrvDeleted);
                            } else {
                                debug!("{} waiting for {name} to register", self.name);
                            }
                            watch
                        }
                        // Registered in between, or still racing.
                        Ok(_) => continue,
                        Err(err) => {
                            error!("{} lost its watch on {name}: {err}", self.name);
                            self.apply(BrokerEvent::Error);
                            return;
                        }
                    }
                }
                Err(err) => {
                    error!("{} lost its watch on {name}: {err}", self.name);
                    self.apply(BrokerEvent::Error);
                    return;
                }
            };

            let event = tokio::select! {
                () = self.token.cancelled() => return,
                event = watch.fired() => event,
            };
            debug!("{} saw {event:?} on {name}", self.name);
            if event == WatchEvent::SessionClosed {
                return;
            }
        }
    }

    async fn process_record(
        &self,
        name: &str,
        service_path: &str,
        data: Bytes,
        seen: bool,
    ) -> BrokerEvent {
        let record = match self.naming.deserialize_record(data) {
            Ok(record) => record,
            Err(err) => {
                error!("{name} published an unreadable record: {err}");
                return BrokerEvent::Error;
            }
        };
        let Some(tracker) = self.tracker() else {
            return BrokerEvent::Error;
        };

        tracker.set_container_path(service_path, record.container_path.clone());

        if record.status != ServiceStatus::NotRunning {
            let client = &self.client;
            let container_path = record.container_path.as_str();

            match self
                .retry
                .run("get", move || client.get(container_path))
                .await
            {
                Ok(Outcome::Done((bytes, _))) => match decode_descriptor(container_path, &bytes) {
                    Ok(descriptor) => {
                        tracker.set_container_descriptor(service_path, descriptor);
                        tracker.set_processed(name);
                    }
                    Err(err) => {
                        error!("descriptor of {name} is unreadable: {err}");
                        return BrokerEvent::Error;
                    }
                },
                Ok(Outcome::NoNode | Outcome::NodeExists) => {
                    warn!("descriptor of {name} not found at {container_path}");
                }
                Err(err) => {
                    error!("failed to download descriptor of {name}: {err}");
                    return BrokerEvent::Error;
                }
            }
        }

        let previous = tracker.set_remote_status(service_path, record.status);
        debug!("{name} reports {:?}", record.status);
        event_for(previous.filter(|_| seen), record.status)
    }

    async fn finish(&self) {
        self.stop_process().await;
        self.pool.shutdown().await;

        let teardown = self.retry.with_max_attempts(TEARDOWN_ATTEMPTS);
        let client = &self.client;
        let service_path = self.service_path.as_str();
        match teardown
            .run("delete", move || client.delete(service_path, None))
            .await
        {
            Ok(Outcome::Done(())) => debug!("{} deregistered", self.name),
            Ok(Outcome::NoNode | Outcome::NodeExists) => {}
            Err(err) => warn!("{} failed to deregister: {err}", self.name),
        }

        if let Err(err) = self.client.close().await {
            warn!("{} failed to close its session: {err}", self.name);
        }

        self.token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        info!("{} broker stopped", self.name);
    }
}

async fn write_file(dir: &Path, file: &Path, data: &Bytes) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io("failed to create configuration directory", e))?;
    tokio::fs::write(file, data)
        .await
        .map_err(|e| Error::Io("failed to write configuration copy", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_for_record_changes() {
        use ServiceStatus as S;

        assert_eq!(event_for(None, S::NotInitialized), BrokerEvent::SrvAdded);
        assert_eq!(event_for(None, S::Initialized), BrokerEvent::SrvAdded);
        assert_eq!(event_for(None, S::NotRunning), BrokerEvent::SrvNotRunning);
        assert_eq!(
            event_for(Some(S::NotInitialized), S::Initialized),
            BrokerEvent::SrvInitialized
        );
        assert_eq!(
            event_for(Some(S::Initialized), S::NotInitialized),
            BrokerEvent::SrvNotInitialized
        );
        assert_eq!(
            event_for(Some(S::Initialized), S::Updated),
            BrokerEvent::SrvUpdated
        );
        assert_eq!(
            event_for(Some(S::Initialized), S::NotRunning),
            BrokerEvent::SrvNotRunning
        );
    }

    fn descriptor(kind: &str) -> ContainerDescriptor {
        let settings = match kind {
            "data" => serde_json::json!({"kind": "data", "database": "orders"}),
            other => serde_json::json!({"kind": other}),
        };
        serde_json::from_value(serde_json::json!({
            "name": "db",
            "image": "postgres",
            "start": {"command": ["postgres"], "port": 5432},
            "settings": settings
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_uses_kind_of_parent_node() {
        let data = descriptor("data").to_bytes().unwrap();

        assert!(decode_descriptor("/shop/data/db", &data).is_ok());
        assert!(decode_descriptor("/shop/conf/db", &data).is_ok());
        assert!(matches!(
            decode_descriptor("/shop/web/db", &data),
            Err(Error::Descriptor(_))
        ));
    }

    #[test]
    fn test_address_changes_are_not_significant() {
        let original = descriptor("web");
        let mut addressed = original.clone();
        (addressed.capabilities().update_ip)(&mut addressed, Ipv4Addr::new(10, 0, 0, 7).into());

        assert_ne!(original, addressed);
        assert_eq!(without_address(&original), without_address(&addressed));

        let mut changed = original.clone();
        changed.start.port = Some(8081);
        assert_ne!(without_address(&original), without_address(&changed));
    }
}
