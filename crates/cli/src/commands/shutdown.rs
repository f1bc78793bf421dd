use super::NamespaceArgs;
use crate::Result;

pub async fn run(args: NamespaceArgs) -> Result<()> {
    let master = args.master().await?;
    master.signal_shutdown().await?;
    master.close().await?;
    Ok(())
}
