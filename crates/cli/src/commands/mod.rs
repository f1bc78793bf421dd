pub mod broker;
pub mod clean;
pub mod coordinator;
pub mod deploy;
pub mod shutdown;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use convoy_coordination::RetryPolicy;
use convoy_coordination_tcp::{TcpClientOptions, TcpCoordinationClient};
use convoy_master::{MasterCoordinator, MasterOptions};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{Error, Result};

#[derive(Clone, Debug, Args)]
pub struct CoordinatorArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:2181", env = "CONVOY_LISTEN")]
    pub listen: SocketAddr,
}

#[derive(Clone, Debug, Args)]
pub struct NamespaceArgs {
    /// Coordination store hosts, comma separated `host:port`
    #[arg(long, default_value = "127.0.0.1:2181", env = "CONVOY_HOSTS")]
    pub hosts: String,

    /// Application root
    #[arg(long, env = "CONVOY_ROOT")]
    pub root: String,

    /// Client session timeout in milliseconds
    #[arg(long, default_value_t = 10_000, env = "CONVOY_SESSION_TIMEOUT_MS")]
    pub session_timeout_ms: u64,
}

impl NamespaceArgs {
    pub fn hosts(&self) -> Vec<String> {
        self.hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    pub const fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub async fn master(&self) -> Result<MasterCoordinator<TcpCoordinationClient>> {
        let client = TcpCoordinationClient::connect(TcpClientOptions {
            hosts: self.hosts(),
            session_timeout: self.session_timeout(),
        })
        .await?;

        Ok(MasterCoordinator::new(
            client,
            MasterOptions {
                root: self.root.clone(),
                retry: RetryPolicy::default(),
            },
        ))
    }
}

#[derive(Clone, Debug, Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub namespace: NamespaceArgs,

    /// Application description (JSON)
    #[arg(long, env = "CONVOY_APPLICATION")]
    pub application: PathBuf,

    /// Network the containers join
    #[arg(long, env = "CONVOY_NETWORK")]
    pub network: Option<String>,

    /// Program started for each container's broker, defaults to this binary
    #[arg(long, env = "CONVOY_BROKER_PROGRAM")]
    pub program: Option<String>,

    /// Seconds teardown waits for brokers to deregister
    #[arg(long, default_value_t = 30, env = "CONVOY_DRAIN_TIMEOUT_SECS")]
    pub drain_timeout_secs: u64,
}

/// Waits for SIGTERM or SIGINT.
pub async fn wait_for_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).map_err(Error::Signal)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(Error::Signal)?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    Ok(())
}

/// Cancels `token` on SIGTERM or SIGINT.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(err) = wait_for_signal().await {
            error!("{err}");
            return;
        }

        info!("Shutting down");
        token.cancel();
    });
}
