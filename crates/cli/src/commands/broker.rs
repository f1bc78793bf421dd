use convoy_broker::{Broker, BrokerArgs};
use convoy_coordination_tcp::{TcpClientOptions, TcpCoordinationClient};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::cancel_on_signal;
use crate::Result;

pub async fn run(args: BrokerArgs) -> Result<()> {
    let client = TcpCoordinationClient::connect(TcpClientOptions {
        hosts: args.hosts(),
        session_timeout: args.session_timeout(),
    })
    .await?;
    info!("broker for {} connected", args.node_path);

    let shutdown_token = CancellationToken::new();
    cancel_on_signal(shutdown_token.clone());

    Broker::new(client, args.options(), &shutdown_token)
        .run()
        .await?;

    Ok(())
}
