//! Wire the RPC provider, the settlement API and the store of a network
//! into a sync pipeline.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tradesync_common::{
    historical::{HistoricalOptions, HistoricalSync},
    orchestrator::NetworkSync,
    pipeline::BlockPipeline,
    Backoff, NetworkConfig, SyncError, SyncErrorResultExt,
};
use tradesync_sink_mongo::{MongoStore, MongoTradeStore};

use crate::{
    provider::{JsonRpcProvider, JsonRpcProviderOptions},
    settlement_api::SettlementApiClient,
};

pub type EvmPipeline = BlockPipeline<Arc<JsonRpcProvider>, SettlementApiClient, MongoTradeStore>;

/// Options shared by the clients of all networks.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub rpc: JsonRpcProviderOptions,
    pub api_timeout: Duration,
}

/// The clients used to sync one network.
pub struct NetworkClients {
    pub provider: Arc<JsonRpcProvider>,
    pub api: SettlementApiClient,
    pub store: MongoTradeStore,
}

impl NetworkClients {
    /// Create the clients of `network` and prepare its collection.
    pub async fn connect(
        network: &NetworkConfig,
        options: &ClientOptions,
        store: &MongoStore,
    ) -> Result<Self, SyncError> {
        let provider = JsonRpcProvider::new(network.rpc_url.clone(), options.rpc.clone())
            .configuration("failed to create json-rpc provider")
            .attach_printable_lazy(|| format!("network: {}", network.name))?;

        let api = SettlementApiClient::new(network.api_base_url.clone(), options.api_timeout)
            .configuration("failed to create settlement api client")
            .attach_printable_lazy(|| format!("network: {}", network.name))?;

        let store = store
            .trade_store(network)
            .await
            .initialization("failed to prepare trade collection")
            .attach_printable_lazy(|| format!("network: {}", network.name))?;

        Ok(Self {
            provider: Arc::new(provider),
            api,
            store,
        })
    }

    pub fn into_pipeline(self, network: NetworkConfig, backoff: Backoff) -> EvmPipeline {
        BlockPipeline::new(network, self.provider, self.api, self.store, backoff)
    }
}

/// Runs the historical sync of each network it's given.
pub struct EvmNetworkSync {
    store: MongoStore,
    clients: ClientOptions,
    backoff: Backoff,
    historical: HistoricalOptions,
}

impl EvmNetworkSync {
    pub fn new(
        store: MongoStore,
        clients: ClientOptions,
        backoff: Backoff,
        historical: HistoricalOptions,
    ) -> Self {
        Self {
            store,
            clients,
            backoff,
            historical,
        }
    }
}

#[async_trait]
impl NetworkSync for EvmNetworkSync {
    async fn sync_network(
        &self,
        network: &NetworkConfig,
        ct: CancellationToken,
    ) -> Result<(), SyncError> {
        let clients = NetworkClients::connect(network, &self.clients, &self.store).await?;
        let pipeline = clients.into_pipeline(network.clone(), self.backoff.clone());

        let summary = HistoricalSync::new(pipeline, self.historical.clone())
            .run(ct)
            .await?;

        info!(
            network = %network.name,
            latest_block = summary.latest_block,
            target_block = summary.target_block,
            saved = summary.progress.saved,
            cancelled = summary.cancelled,
            "historical sync summary"
        );

        Ok(())
    }
}
