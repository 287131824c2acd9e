use clap::Args;
use error_stack::{Result, ResultExt};
use tracing::info;
use tradesync_common::{cli::NetworkArgs, store::TradeStore, SyncError, SyncErrorResultExt};
use tradesync_sink_mongo::MongoArgs;

use super::common::connect_store;

/// Delete the trades stored before a block.
#[derive(Args, Debug)]
pub struct PruneCommand {
    #[clap(flatten)]
    network: NetworkArgs,
    #[clap(flatten)]
    mongo: MongoArgs,
    /// Delete trades with a block number strictly lower than this.
    #[arg(long = "before-block")]
    before_block: u64,
}

impl PruneCommand {
    pub async fn run(self) -> Result<(), SyncError> {
        let network = self.network.to_network()?;
        let store = connect_store(&self.mongo).await?;
        let trades = store
            .trade_store(&network)
            .await
            .initialization("failed to prepare trade collection")?;

        let deleted = trades
            .delete_before_block(self.before_block)
            .await
            .change_context(SyncError::Store)
            .attach_printable_lazy(|| format!("network: {}", network.name))?;

        info!(
            network = %network.name,
            before_block = self.before_block,
            deleted,
            "trades pruned"
        );

        Ok(())
    }
}
