use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::readiness::{ProbeOptions, Readiness, match_control_token, probe_socket};
use crate::state::{ProcessState, next_state};

/// A program invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessCommand {
    /// Program to execute.
    pub program: String,

    /// Arguments after the program.
    pub args: Vec<String>,

    /// Variables added to the inherited environment.
    pub env: BTreeMap<String, String>,

    /// Working directory, if not the current one.
    pub working_dir: Option<PathBuf>,
}

impl ProcessCommand {
    /// Creates a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Splits an argv into program and arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCommand`] if `argv` is empty.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv.split_first().ok_or(Error::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            ..Self::default()
        })
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds environment variables.
    #[must_use]
    pub fn envs(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.env);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// How a process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, absent when killed by a signal.
    pub code: Option<i32>,

    /// Terminating signal, if any.
    pub signal: Option<i32>,

    /// Whether the process exited with status zero.
    pub success: bool,
}

impl From<ExitStatus> for ExitReport {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
            success: status.success(),
        }
    }
}

/// Observable state of a supervisor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Current lifecycle state.
    pub state: ProcessState,

    /// Incremented on every start.
    pub generation: u64,

    /// Whether the process is alive.
    pub running: bool,

    /// Latest readiness verdict for this generation.
    pub initialized: bool,

    /// Pid of the spawned process.
    pub pid: Option<u32>,

    /// Pid handed over through the control token.
    pub delegate_pid: Option<u32>,

    /// How the process ended.
    pub exit: Option<ExitReport>,

    /// Why readiness could not be decided normally.
    pub failure: Option<String>,
}

/// Options for creating a [`ProcessSupervisor`].
#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    /// Name used in logs.
    pub name: String,

    /// How readiness is judged.
    pub readiness: Readiness,

    /// Command run before signalling the process on stop.
    pub stop_command: Option<ProcessCommand>,

    /// How long to wait after SIGTERM before killing.
    pub stop_grace: Duration,

    /// Cancelling this token terminates the process and interrupts waiters.
    pub shutdown_token: CancellationToken,
}

impl SupervisorOptions {
    /// Options with no stop command and a ten second grace period.
    pub fn new(name: impl Into<String>, readiness: Readiness) -> Self {
        Self {
            name: name.into(),
            readiness,
            stop_command: None,
            stop_grace: Duration::from_secs(10),
            shutdown_token: CancellationToken::new(),
        }
    }
}

struct Current {
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    name: String,
    readiness: Readiness,
    stop_command: Option<ProcessCommand>,
    stop_grace: Duration,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    snapshot: watch::Sender<Snapshot>,
    current: Mutex<Option<Current>>,
}

impl Inner {
    fn apply(&self, generation: u64, update: impl FnOnce(&mut Snapshot)) {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.generation != generation {
                return false;
            }

            let before = snapshot.state;
            update(snapshot);
            snapshot.state = next_state(before, snapshot.running, snapshot.initialized);
            if snapshot.state != before {
                debug!("{}: {:?} -> {:?}", self.name, before, snapshot.state);
            }
            true
        });
    }
}

/// Spawns one process at a time and tracks its readiness.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Creates an idle supervisor.
    #[must_use]
    pub fn new(
        SupervisorOptions {
            name,
            readiness,
            stop_command,
            stop_grace,
            shutdown_token,
        }: SupervisorOptions,
    ) -> Self {
        let (snapshot, _) = watch::channel(Snapshot::default());

        Self {
            inner: Arc::new(Inner {
                name,
                readiness,
                stop_command,
                stop_grace,
                shutdown_token,
                task_tracker: TaskTracker::new(),
                snapshot,
                current: Mutex::new(None),
            }),
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.inner.snapshot.borrow().state
    }

    /// Copy of the full observable state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Pid handed over through the control token.
    #[must_use]
    pub fn delegate_pid(&self) -> Option<u32> {
        self.inner.snapshot.borrow().delegate_pid
    }

    /// Spawns the process and starts judging its readiness.
    ///
    /// # Errors
    ///
    /// Fails when a process is already running, shutdown has begun, or the
    /// spawn itself fails.
    pub fn start(&self, command: &ProcessCommand) -> Result<u32> {
        let inner = &self.inner;
        if inner.shutdown_token.is_cancelled() {
            return Err(Error::Interrupted);
        }

        let mut current = inner.current.lock();
        if inner.snapshot.borrow().running {
            return Err(Error::AlreadyRunning(inner.name.clone()));
        }

        let mut process = command.to_command();
        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = process
            .spawn()
            .map_err(|e| Error::SpawnProcess(format!("{}: {e}", command.program)))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::SpawnProcess("Failed to get child PID".to_string()))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut generation = 0;
        inner.snapshot.send_modify(|snapshot| {
            generation = snapshot.generation + 1;
            *snapshot = Snapshot {
                state: next_state(ProcessState::NotRunning, true, false),
                generation,
                running: true,
                pid: Some(pid),
                ..Snapshot::default()
            };
        });
        info!("started {} with pid {pid} (generation {generation})", inner.name);

        let token = inner.shutdown_token.child_token();
        *current = Some(Current {
            generation,
            token: token.clone(),
        });
        drop(current);

        if let Some(stderr) = stderr {
            inner
                .task_tracker
                .spawn(forward_lines(
                    inner.name.clone(),
                    stderr,
                    Stream::Stderr,
                    inner.shutdown_token.clone(),
                ));
        }

        match (&inner.readiness, stdout) {
            (Readiness::OutputToken { token: marker }, Some(stdout)) => {
                inner.task_tracker.spawn(scan_output(
                    inner.clone(),
                    generation,
                    stdout,
                    marker.clone(),
                ));
            }
            (_, Some(stdout)) => {
                inner
                    .task_tracker
                    .spawn(forward_lines(
                        inner.name.clone(),
                        stdout,
                        Stream::Stdout,
                        inner.shutdown_token.clone(),
                    ));
            }
            (_, None) => {}
        }

        match &inner.readiness {
            Readiness::Socket { addr, options } => {
                inner.task_tracker.spawn(probe(
                    inner.clone(),
                    generation,
                    *addr,
                    *options,
                    token.clone(),
                ));
            }
            Readiness::Immediate => inner.apply(generation, |snapshot| snapshot.initialized = true),
            Readiness::OutputToken { .. } => {}
        }

        inner
            .task_tracker
            .spawn(monitor(inner.clone(), child, pid, generation, token));

        Ok(pid)
    }

    /// Waits until the current run has a readiness verdict or has exited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] before the first start and
    /// [`Error::Interrupted`] once shutdown begins.
    pub async fn wait_for_initialization(&self) -> Result<ProcessState> {
        let mut snapshot = self.inner.snapshot.subscribe();
        if snapshot.borrow().generation == 0 {
            return Err(Error::NotStarted);
        }

        tokio::select! {
            biased;
            () = self.inner.shutdown_token.cancelled() => Err(Error::Interrupted),
            state = settled(&mut snapshot) => state.ok_or(Error::Interrupted),
        }
    }

    /// Waits until the current run has exited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] before the first start and
    /// [`Error::Interrupted`] if shutdown begins first.
    pub async fn wait_proc(&self) -> Result<Option<ExitReport>> {
        let mut snapshot = self.inner.snapshot.subscribe();
        if snapshot.borrow().generation == 0 {
            return Err(Error::NotStarted);
        }

        tokio::select! {
            biased;
            exit = exited(&mut snapshot) => Ok(exit),
            () = self.inner.shutdown_token.cancelled() => Err(Error::Interrupted),
        }
    }

    /// Stops the running process, if any.
    ///
    /// Runs the stop command first when configured, then sends SIGTERM and
    /// kills the process if it outlives the grace period.
    ///
    /// # Errors
    ///
    /// Currently infallible; failures to stop are logged.
    pub async fn stop(&self) -> Result<()> {
        let current = self.inner.current.lock().take();
        let Some(current) = current else {
            debug!("{} has no process to stop", self.inner.name);
            return Ok(());
        };
        let snapshot = self.inner.snapshot.subscribe();

        if let Some(command) = &self.inner.stop_command {
            self.run_stop_command(command).await;
            if tokio::time::timeout(
                self.inner.stop_grace,
                stopped(snapshot.clone(), current.generation),
            )
            .await
            .is_err()
            {
                warn!("{} still running after its stop command", self.inner.name);
            }
        }

        current.token.cancel();
        stopped(snapshot, current.generation).await;
        info!("stopped {}", self.inner.name);

        Ok(())
    }

    /// Terminates any process and waits for all background tasks.
    pub async fn shutdown(&self) {
        self.inner.shutdown_token.cancel();
        self.inner.task_tracker.close();
        self.inner.task_tracker.wait().await;
    }

    async fn run_stop_command(&self, command: &ProcessCommand) {
        let mut process = command.to_command();
        process
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.inner.stop_grace, process.status()).await {
            Ok(Ok(status)) if status.success() => {
                info!("stop command for {} completed", self.inner.name);
            }
            Ok(Ok(status)) => {
                warn!("stop command for {} exited with {status}", self.inner.name);
            }
            Ok(Err(err)) => {
                error!("failed to run stop command for {}: {err}", self.inner.name);
            }
            Err(_) => {
                warn!("stop command for {} timed out", self.inner.name);
            }
        }
    }
}

async fn settled(snapshot: &mut watch::Receiver<Snapshot>) -> Option<ProcessState> {
    snapshot
        .wait_for(|snapshot| snapshot.generation > 0 && snapshot.state != ProcessState::Running)
        .await
        .ok()
        .map(|snapshot| snapshot.state)
}

async fn exited(snapshot: &mut watch::Receiver<Snapshot>) -> Option<ExitReport> {
    snapshot
        .wait_for(|snapshot| !snapshot.running)
        .await
        .ok()
        .and_then(|snapshot| snapshot.exit)
}

async fn stopped(mut snapshot: watch::Receiver<Snapshot>, generation: u64) {
    let _ = snapshot
        .wait_for(|snapshot| snapshot.generation != generation || !snapshot.running)
        .await;
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn forward_lines<R>(name: String, reader: R, stream: Stream, shutdown: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let Ok(Some(line)) = line else {
            break;
        };
        match stream {
            Stream::Stdout => info!("{name} stdout: {line}"),
            Stream::Stderr => warn!("{name} stderr: {line}"),
        }
    }
}

async fn scan_output(inner: Arc<Inner>, generation: u64, stdout: ChildStdout, marker: String) {
    let mut lines = BufReader::new(stdout).lines();
    let mut found = false;

    loop {
        let line = tokio::select! {
            () = inner.shutdown_token.cancelled() => return,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if !found {
                    match match_control_token(&line, &marker) {
                        Some(Some(delegate)) => {
                            found = true;
                            info!("{} handed over to pid {delegate}", inner.name);
                            inner.apply(generation, |snapshot| {
                                snapshot.initialized = true;
                                snapshot.delegate_pid = Some(delegate);
                            });
                            continue;
                        }
                        Some(None) => warn!("{} printed a malformed control token", inner.name),
                        None => {}
                    }
                }
                info!("{} stdout: {line}", inner.name);
            }
            Ok(None) => break,
            Err(err) => {
                if !found {
                    error!("failed to read output of {}: {err}", inner.name);
                    inner.apply(generation, |snapshot| {
                        snapshot.failure = Some(err.to_string());
                    });
                }
                return;
            }
        }
    }

    if !found {
        warn!("{} closed its output without a control token", inner.name);
        inner.apply(generation, |snapshot| snapshot.initialized = false);
    }
}

async fn probe(
    inner: Arc<Inner>,
    generation: u64,
    addr: SocketAddr,
    options: ProbeOptions,
    token: CancellationToken,
) {
    let verdict = tokio::select! {
        () = token.cancelled() => return,
        () = stopped(inner.snapshot.subscribe(), generation) => return,
        verdict = probe_socket(addr, options) => verdict,
    };

    match verdict {
        Ok(true) => {
            info!("{} is accepting connections on {addr}", inner.name);
            inner.apply(generation, |snapshot| snapshot.initialized = true);
        }
        Ok(false) => {
            warn!(
                "{} did not accept connections on {addr} within {:?}",
                inner.name, options.timeout
            );
            inner.apply(generation, |snapshot| snapshot.initialized = false);
        }
        Err(err) => {
            error!("readiness probe for {} failed: {err}", inner.name);
            inner.apply(generation, |snapshot| {
                snapshot.failure = Some(err.to_string());
            });
        }
    }
}

async fn monitor(
    inner: Arc<Inner>,
    mut child: Child,
    pid: u32,
    generation: u64,
    token: CancellationToken,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = token.cancelled() => {
            info!("terminating {} (pid {pid})", inner.name);
            terminate(&mut child, pid, inner.stop_grace).await
        }
    };

    let exit = match status {
        Ok(status) => {
            if status.success() {
                info!("{} exited cleanly", inner.name);
            } else {
                error!("{} exited with non-zero status: {status}", inner.name);
            }
            Some(ExitReport::from(status))
        }
        Err(err) => {
            error!("failed to wait for {}: {err}", inner.name);
            None
        }
    };

    inner.apply(generation, |snapshot| {
        snapshot.running = false;
        snapshot.exit = exit;
    });
}

async fn terminate(child: &mut Child, pid: u32, grace: Duration) -> std::io::Result<ExitStatus> {
    match i32::try_from(pid) {
        Ok(raw_pid) => {
            if let Err(err) = signal::kill(Pid::from_raw(raw_pid), Signal::SIGTERM) {
                error!("failed to send SIGTERM to {pid}: {err}");
            }
        }
        Err(_) => error!("pid {pid} out of range"),
    }

    if let Ok(result) = tokio::time::timeout(grace, child.wait()).await {
        return result;
    }

    error!("timeout waiting for {pid} to exit, killing...");
    child.kill().await?;
    child.wait().await
}
