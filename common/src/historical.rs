//! Backfill the trades of a recent time window, walking backward from the head.
use std::{sync::Arc, time::Duration};

use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    chain::BlockSource,
    error::SyncError,
    order::OrderSource,
    pipeline::{BlockPipeline, Direction, FailurePolicy, WalkOptions},
    progress::{spawn_reporter, ProgressSnapshot, SyncProgress},
    store::TradeStore,
};

#[derive(Debug, Clone)]
pub struct HistoricalOptions {
    /// How far back in time to sync.
    pub lookback: Duration,
    /// Pause between two blocks.
    pub block_cooldown: Duration,
    /// How often to log the progress.
    pub report_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct HistoricalSummary {
    pub latest_block: u64,
    pub target_block: u64,
    /// Whether the sync was cancelled before reaching the target block.
    pub cancelled: bool,
    pub progress: ProgressSnapshot,
}

pub struct HistoricalSync<B, O, S> {
    pipeline: BlockPipeline<B, O, S>,
    options: HistoricalOptions,
    progress: Arc<SyncProgress>,
}

/// Returns the lowest block to sync, `blocks_in_window` blocks before `latest`.
pub fn target_block(latest: u64, blocks_in_window: u64) -> u64 {
    latest.saturating_sub(blocks_in_window)
}

impl<B, O, S> HistoricalSync<B, O, S>
where
    B: BlockSource,
    O: OrderSource,
    S: TradeStore,
{
    pub fn new(pipeline: BlockPipeline<B, O, S>, options: HistoricalOptions) -> Self {
        Self {
            pipeline,
            options,
            progress: Arc::new(SyncProgress::new()),
        }
    }

    pub fn progress(&self) -> Arc<SyncProgress> {
        self.progress.clone()
    }

    /// Sync all blocks from the head down to the target block.
    ///
    /// Blocks that fail are logged and counted; only failing to read the
    /// head of the chain fails the sync.
    #[instrument(skip_all, fields(network = %self.pipeline.network().name))]
    pub async fn run(&self, ct: CancellationToken) -> Result<HistoricalSummary, SyncError> {
        let network = self.pipeline.network();

        let latest_block = self
            .pipeline
            .latest_block_number()
            .await
            .change_context(SyncError::Initialization)
            .attach_printable("failed to fetch latest block number")
            .attach_printable_lazy(|| format!("network: {}", network.name))?;

        let target_block = target_block(
            latest_block,
            network.blocks_in_window(self.options.lookback),
        );
        self.progress
            .set_total_blocks(latest_block - target_block + 1);

        info!(
            network = %network.name,
            chain_id = network.chain_id,
            latest_block,
            target_block,
            block_cooldown = ?self.options.block_cooldown,
            "starting historical sync"
        );

        let reporter_ct = ct.child_token();
        let reporter = spawn_reporter(
            format!("historical:{}", network.name),
            self.progress.clone(),
            self.options.report_interval,
            reporter_ct.clone(),
        );

        let walk_options = WalkOptions {
            direction: Direction::Descending,
            failure_policy: FailurePolicy::Continue,
            block_cooldown: self.options.block_cooldown,
            interruptible: true,
        };

        let outcome = self
            .pipeline
            .walk(target_block, latest_block, &walk_options, &self.progress, &ct)
            .await;

        reporter_ct.cancel();
        if let Err(err) = reporter.await {
            warn!(error = ?err, "progress reporter task failed");
        }
        let outcome = outcome?;

        let progress = self.progress.snapshot();
        if outcome.cancelled {
            info!(network = %network.name, last_block = ?outcome.last_block, "historical sync interrupted");
        } else {
            info!(network = %network.name, "historical sync finished");
        }
        progress.log(&format!("historical:{}", network.name));

        Ok(HistoricalSummary {
            latest_block,
            target_block,
            cancelled: outcome.cancelled,
            progress,
        })
    }
}

impl Default for HistoricalOptions {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(24 * 60 * 60),
            block_cooldown: Duration::from_secs(10 * 60),
            report_interval: Duration::from_secs(30),
        }
    }
}
