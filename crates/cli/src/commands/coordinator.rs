use convoy_coordination_memory::MemoryCoordinationStore;
use convoy_coordination_tcp::{CoordinationServer, ServerOptions};
use tracing::info;

use super::{CoordinatorArgs, wait_for_signal};
use crate::Result;

pub async fn run(args: CoordinatorArgs) -> Result<()> {
    let server = CoordinationServer::start(ServerOptions {
        listen_addr: args.listen,
        store: MemoryCoordinationStore::new(),
    })
    .await?;
    info!("coordination store listening on {}", server.local_addr());

    let result = wait_for_signal().await;
    server.shutdown().await;
    result
}
