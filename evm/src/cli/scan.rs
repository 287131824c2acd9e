use clap::Args;
use error_stack::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tradesync_common::{
    cli::{BackoffArgs, LogScanArgs, NetworkArgs},
    log_scan::LogScanSync,
    SyncError,
};
use tradesync_sink_mongo::MongoArgs;

use crate::runner::NetworkClients;

use super::{common::connect_store, rpc::RpcArgs};

/// Find settlements with `eth_getLogs` instead of reading every block.
#[derive(Args, Debug)]
pub struct ScanLogsCommand {
    #[clap(flatten)]
    network: NetworkArgs,
    #[clap(flatten)]
    rpc: RpcArgs,
    #[clap(flatten)]
    mongo: MongoArgs,
    #[clap(flatten)]
    backoff: BackoffArgs,
    #[clap(flatten)]
    scan: LogScanArgs,
}

impl ScanLogsCommand {
    pub async fn run(self, ct: CancellationToken) -> Result<(), SyncError> {
        let network = self.network.to_network()?;
        let clients = self.rpc.to_client_options()?;
        let backoff = self.backoff.to_backoff()?;
        let options = self.scan.to_log_scan_options()?;

        let store = connect_store(&self.mongo).await?;
        let clients = NetworkClients::connect(&network, &clients, &store).await?;
        let logs = clients.provider.clone();
        let pipeline = clients.into_pipeline(network.clone(), backoff);

        info!(network = %network, "starting settlement log scan");
        let summary = LogScanSync::new(logs, pipeline, options).run(ct).await?;

        info!(
            network = %network.name,
            latest_block = summary.latest_block,
            target_block = summary.target_block,
            saved = summary.progress.saved,
            cancelled = summary.cancelled,
            "settlement log scan summary"
        );

        Ok(())
    }
}
