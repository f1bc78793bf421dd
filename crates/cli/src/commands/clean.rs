use tracing::info;

use super::NamespaceArgs;
use crate::Result;

pub async fn run(args: NamespaceArgs) -> Result<()> {
    let master = args.master().await?;
    let deleted = master.clean_namespace().await?;
    info!("removed {deleted} nodes under {}", args.root);
    master.close().await?;
    Ok(())
}
