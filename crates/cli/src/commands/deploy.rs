use std::time::Duration;

use bytes::Bytes;
use convoy_descriptor::Application;
use convoy_master::{Deployment, DeploymentOptions, LocalBackend, LocalBackendOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{DeployArgs, wait_for_signal};
use crate::{Error, Result};

const STOP_GRACE: Duration = Duration::from_secs(10);

pub async fn run(args: DeployArgs) -> Result<()> {
    let data = tokio::fs::read(&args.application)
        .await
        .map_err(|e| Error::ReadApplication(args.application.clone(), e))?;
    let application = Application::try_from(Bytes::from(data))?;
    application.validate()?;

    let program = match args.program {
        Some(program) => program,
        None => std::env::current_exe()
            .map_err(Error::CurrentExe)?
            .display()
            .to_string(),
    };

    let shutdown_token = CancellationToken::new();
    let backend = LocalBackend::new(LocalBackendOptions {
        program,
        stop_grace: STOP_GRACE,
        shutdown_token: shutdown_token.clone(),
    });
    let master = args.namespace.master().await?;
    let mut deployment = Deployment::new(
        master,
        backend,
        application,
        DeploymentOptions {
            hosts: args.namespace.hosts(),
            session_timeout: args.namespace.session_timeout(),
            network: args.network,
            drain_timeout: Duration::from_secs(args.drain_timeout_secs),
        },
    );

    if let Err(err) = deployment.deploy().await {
        error!("deployment failed: {err}");
        if let Err(teardown) = deployment.teardown().await {
            error!("cleanup after failed deployment failed: {teardown}");
        }
        shutdown_token.cancel();
        return Err(err.into());
    }

    tokio::select! {
        result = wait_for_signal() => result?,
        result = deployment.wait_for_shutdown() => {
            result?;
            info!("shutdown signaled");
        }
    }

    let result = deployment.teardown().await;
    shutdown_token.cancel();
    result.map_err(Error::from)
}
