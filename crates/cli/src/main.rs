//! The `convoy` binary: coordination server, brokers and deployments.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod commands;

use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use convoy_broker::BrokerArgs;
use tracing::Level;

use crate::commands::{CoordinatorArgs, DeployArgs, NamespaceArgs};

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Broker error
    #[error(transparent)]
    Broker(#[from] convoy_broker::Error),

    /// Coordination connection error
    #[error(transparent)]
    Coordination(#[from] convoy_coordination_tcp::Error),

    /// The convoy binary could not be located
    #[error("failed to locate the convoy binary: {0}")]
    CurrentExe(#[source] io::Error),

    /// Application description error
    #[error(transparent)]
    Descriptor(#[from] convoy_descriptor::Error),

    /// Deployment error
    #[error(transparent)]
    Master(#[from] convoy_master::Error),

    /// The application description could not be read
    #[error("failed to read {}: {}", .0.display(), .1)]
    ReadApplication(PathBuf, #[source] io::Error),

    /// Signal handlers could not be installed
    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),

    /// The tracing subscriber could not be installed
    #[error(transparent)]
    Tracing(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Result type for CLI commands.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Maximum log level
    #[arg(long, default_value_t = Level::INFO, env = "CONVOY_LOG_LEVEL", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Serve a development coordination store over TCP
    Coordinator(CoordinatorArgs),

    /// Boot, run and shut down the service of one container
    Broker(BrokerArgs),

    /// Deploy an application and keep it running until shutdown
    Deploy(DeployArgs),

    /// Signal every broker of an application to shut down
    Shutdown(NamespaceArgs),

    /// Remove the namespace of an application
    Clean(NamespaceArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(args.log_level)
            .finish(),
    )?;

    match args.command {
        Command::Coordinator(args) => commands::coordinator::run(args).await,
        Command::Broker(args) => commands::broker::run(args).await,
        Command::Deploy(args) => commands::deploy::run(args).await,
        Command::Shutdown(args) => commands::shutdown::run(args).await,
        Command::Clean(args) => commands::clean::run(args).await,
    }
}
