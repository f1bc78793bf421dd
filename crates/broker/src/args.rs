use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use convoy_supervisor::DEFAULT_CONTROL_TOKEN;

use crate::broker::BrokerOptions;

/// Startup arguments of a broker process.
#[derive(Clone, Debug, Args)]
pub struct BrokerArgs {
    /// Coordination store hosts, comma separated `host:port`
    pub hosts: String,

    /// Client session timeout in milliseconds
    pub session_timeout_ms: u64,

    /// Descriptor node of this container
    pub node_path: String,

    /// Naming service root
    pub naming_root: String,

    /// Shutdown node
    pub shutdown_path: String,

    /// Root of the post-boot configuration copies
    pub conf_root: String,

    /// Directory the local configuration copy is written to
    #[arg(long, env = "CONVOY_CONF_DIR")]
    pub conf_dir: Option<PathBuf>,

    /// Size of the worker pool
    #[arg(long, default_value_t = 4, env = "CONVOY_BROKER_WORKERS")]
    pub workers: usize,

    /// Marker an entrypoint prints before the pid of the real service
    #[arg(long, default_value = DEFAULT_CONTROL_TOKEN, env = "CONVOY_CONTROL_TOKEN")]
    pub control_token: String,
}

impl BrokerArgs {
    /// The coordination store hosts.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        self.hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    /// The client session timeout.
    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Broker options for these arguments.
    #[must_use]
    pub fn options(&self) -> BrokerOptions {
        BrokerOptions {
            node_path: self.node_path.clone(),
            naming_root: self.naming_root.clone(),
            shutdown_path: self.shutdown_path.clone(),
            conf_root: self.conf_root.clone(),
            conf_dir: self.conf_dir.clone(),
            workers: self.workers,
            control_token: self.control_token.clone(),
            ..BrokerOptions::default()
        }
    }
}
