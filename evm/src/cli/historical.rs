use clap::Args;
use error_stack::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tradesync_common::{
    cli::{BackoffArgs, HistoricalArgs, NetworkArgs},
    orchestrator::{NetworkSync, Orchestrator},
    SyncError,
};
use tradesync_sink_mongo::MongoArgs;

use crate::runner::EvmNetworkSync;

use super::{common::connect_store, rpc::RpcArgs};

/// Sync the trades of the last hours of one network, newest block first.
#[derive(Args, Debug)]
pub struct HistoricalCommand {
    #[clap(flatten)]
    network: NetworkArgs,
    #[clap(flatten)]
    rpc: RpcArgs,
    #[clap(flatten)]
    mongo: MongoArgs,
    #[clap(flatten)]
    backoff: BackoffArgs,
    #[clap(flatten)]
    historical: HistoricalArgs,
}

/// Run the historical sync of every configured network, one after the other.
#[derive(Args, Debug)]
pub struct BackfillCommand {
    #[clap(flatten)]
    network: NetworkArgs,
    #[clap(flatten)]
    rpc: RpcArgs,
    #[clap(flatten)]
    mongo: MongoArgs,
    #[clap(flatten)]
    backoff: BackoffArgs,
    #[clap(flatten)]
    historical: HistoricalArgs,
}

impl HistoricalCommand {
    pub async fn run(self, ct: CancellationToken) -> Result<(), SyncError> {
        let network = self.network.to_network()?;
        let sync = network_sync(&self.rpc, &self.mongo, &self.backoff, &self.historical).await?;

        info!(network = %network, "starting historical sync");
        sync.sync_network(&network, ct).await
    }
}

impl BackfillCommand {
    pub async fn run(self, ct: CancellationToken) -> Result<(), SyncError> {
        let networks = self.network.to_networks()?;
        let sync = network_sync(&self.rpc, &self.mongo, &self.backoff, &self.historical).await?;

        info!(networks = networks.len(), "starting backfill");
        let summary = Orchestrator::new(networks, sync).run(ct).await;

        if !summary.failed.is_empty() {
            warn!(failed = ?summary.failed, "some networks failed to sync");
        }

        Ok(())
    }
}

async fn network_sync(
    rpc: &RpcArgs,
    mongo: &MongoArgs,
    backoff: &BackoffArgs,
    historical: &HistoricalArgs,
) -> Result<EvmNetworkSync, SyncError> {
    let clients = rpc.to_client_options()?;
    let backoff = backoff.to_backoff()?.with_jitter(historical.jitter()?);
    let options = historical.to_historical_options()?;
    let store = connect_store(mongo).await?;

    Ok(EvmNetworkSync::new(store, clients, backoff, options))
}
