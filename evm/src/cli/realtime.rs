use clap::Args;
use error_stack::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tradesync_common::{
    cli::{BackoffArgs, NetworkArgs, RealtimeArgs},
    realtime::RealtimeSync,
    SyncError,
};
use tradesync_sink_mongo::MongoArgs;

use crate::runner::NetworkClients;

use super::{common::connect_store, rpc::RpcArgs};

/// Follow the head of one network and sync the trades of new blocks.
#[derive(Args, Debug)]
pub struct RealtimeCommand {
    #[clap(flatten)]
    network: NetworkArgs,
    #[clap(flatten)]
    rpc: RpcArgs,
    #[clap(flatten)]
    mongo: MongoArgs,
    #[clap(flatten)]
    backoff: BackoffArgs,
    #[clap(flatten)]
    realtime: RealtimeArgs,
}

impl RealtimeCommand {
    pub async fn run(self, ct: CancellationToken) -> Result<(), SyncError> {
        let network = self.network.to_network()?;
        let clients = self.rpc.to_client_options()?;
        let backoff = self.backoff.to_backoff()?;
        let options = self.realtime.to_realtime_options()?;

        let store = connect_store(&self.mongo).await?;
        let pipeline = NetworkClients::connect(&network, &clients, &store)
            .await?
            .into_pipeline(network.clone(), backoff);

        info!(network = %network, "starting realtime sync");
        let progress = RealtimeSync::new(pipeline, options).run(ct).await?;

        info!(
            network = %network.name,
            saved = progress.saved,
            skipped = progress.skipped,
            errors = progress.errors,
            "realtime sync stopped"
        );

        Ok(())
    }
}
