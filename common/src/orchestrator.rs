//! Run a sync over several networks, one after the other.
use async_trait::async_trait;
use error_stack::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::{error::SyncError, network::NetworkConfig};

/// Sync the trades of one network.
#[async_trait]
pub trait NetworkSync: Send + Sync {
    async fn sync_network(
        &self,
        network: &NetworkConfig,
        ct: CancellationToken,
    ) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Networks not started because the run was cancelled.
    pub skipped: Vec<String>,
}

pub struct Orchestrator<N> {
    networks: Vec<NetworkConfig>,
    sync: N,
}

impl<N> Orchestrator<N>
where
    N: NetworkSync,
{
    pub fn new(networks: Vec<NetworkConfig>, sync: N) -> Self {
        Self { networks, sync }
    }

    /// Sync every network in order.
    ///
    /// A network that fails doesn't stop the others, and is not retried.
    pub async fn run(&self, ct: CancellationToken) -> OrchestratorSummary {
        let mut summary = OrchestratorSummary::default();
        let total = self.networks.len();

        for (index, network) in self.networks.iter().enumerate() {
            if ct.is_cancelled() {
                summary.skipped.push(network.name.clone());
                continue;
            }

            info!(
                network = %network.name,
                chain_id = network.chain_id,
                "syncing network {}/{}",
                index + 1,
                total
            );

            let span = info_span!("network", name = %network.name);
            match self
                .sync
                .sync_network(network, ct.clone())
                .instrument(span)
                .await
            {
                Ok(()) => {
                    info!(network = %network.name, "network synced");
                    summary.succeeded.push(network.name.clone());
                }
                Err(err) => {
                    error!(network = %network.name, error = ?err, "network sync failed");
                    summary.failed.push(network.name.clone());
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "all networks attempted"
        );

        summary
    }
}
