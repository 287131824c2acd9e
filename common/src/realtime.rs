//! Follow the head of the chain, processing new blocks as they are produced.
use std::{sync::Arc, time::Duration};

use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    chain::BlockSource,
    error::SyncError,
    order::OrderSource,
    pipeline::{BlockPipeline, Direction, FailurePolicy, WalkOptions},
    progress::{spawn_reporter, ProgressSnapshot, SyncProgress},
    store::TradeStore,
};

#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    /// How often to check for new blocks.
    pub poll_interval: Duration,
    /// Pause between two blocks of the same batch.
    pub block_cooldown: Duration,
    /// First block to process. Defaults to the block after the head at startup.
    pub starting_block: Option<u64>,
    /// How often to log the progress.
    pub report_interval: Duration,
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No block after the checkpoint.
    UpToDate,
    /// Processed all blocks up to and including `last_block`.
    Processed { first_block: u64, last_block: u64 },
}

pub struct RealtimeSync<B, O, S> {
    pipeline: BlockPipeline<B, O, S>,
    options: RealtimeOptions,
    progress: Arc<SyncProgress>,
    /// Next block to process. Everything before it was processed.
    next_block: Option<u64>,
}

impl<B, O, S> RealtimeSync<B, O, S>
where
    B: BlockSource,
    O: OrderSource,
    S: TradeStore,
{
    pub fn new(pipeline: BlockPipeline<B, O, S>, options: RealtimeOptions) -> Self {
        Self {
            pipeline,
            options,
            progress: Arc::new(SyncProgress::new()),
            next_block: None,
        }
    }

    pub fn progress(&self) -> Arc<SyncProgress> {
        self.progress.clone()
    }

    /// The last block processed, if any.
    pub fn last_processed_block(&self) -> Option<u64> {
        self.next_block.and_then(|next| next.checked_sub(1))
    }

    /// Set the checkpoint, either to the configured starting block or to the
    /// current head.
    pub async fn initialize(&mut self) -> Result<(), SyncError> {
        let next_block = match self.options.starting_block {
            Some(starting_block) => starting_block,
            None => {
                let latest = self
                    .pipeline
                    .latest_block_number()
                    .await
                    .change_context(SyncError::Initialization)
                    .attach_printable("failed to fetch latest block number")?;
                latest + 1
            }
        };

        info!(
            network = %self.pipeline.network().name,
            next_block,
            poll_interval = ?self.options.poll_interval,
            "realtime sync initialized"
        );
        self.next_block = Some(next_block);
        Ok(())
    }

    /// Process all blocks between the checkpoint and the current head.
    ///
    /// The checkpoint moves only if all blocks were processed. On failure the
    /// next poll starts again from the same block.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, SyncError> {
        let Some(next_block) = self.next_block else {
            return Err(SyncError::Fatal).attach_printable("realtime sync not initialized");
        };

        let latest = match self.pipeline.latest_block_number().await {
            Ok(latest) => latest,
            Err(err) => {
                self.progress.record_error();
                return Err(err)
                    .change_context(SyncError::BlockProcessing)
                    .attach_printable("failed to fetch latest block number");
            }
        };

        if latest < next_block {
            debug!(latest, next_block, "no new blocks");
            return Ok(PollOutcome::UpToDate);
        }

        debug!(first_block = next_block, last_block = latest, "processing new blocks");

        let walk_options = WalkOptions {
            direction: Direction::Ascending,
            failure_policy: FailurePolicy::Stop,
            block_cooldown: self.options.block_cooldown,
            // Batches in flight always complete.
            interruptible: false,
        };
        let never_cancelled = CancellationToken::new();
        let outcome = self
            .pipeline
            .walk(
                next_block,
                latest,
                &walk_options,
                &self.progress,
                &never_cancelled,
            )
            .await?;

        self.next_block = Some(latest + 1);
        self.progress.blocks_processed(outcome.blocks, latest);

        Ok(PollOutcome::Processed {
            first_block: next_block,
            last_block: latest,
        })
    }

    /// Poll for new blocks until `ct` is cancelled.
    #[instrument(skip_all, fields(network = %self.pipeline.network().name))]
    pub async fn run(mut self, ct: CancellationToken) -> Result<ProgressSnapshot, SyncError> {
        self.initialize().await?;

        let name = format!("realtime:{}", self.pipeline.network().name);
        let reporter_ct = ct.child_token();
        let reporter = spawn_reporter(
            name.clone(),
            self.progress.clone(),
            self.options.report_interval,
            reporter_ct.clone(),
        );

        while !ct.is_cancelled() {
            let sleep = match self.poll_once().await {
                Ok(PollOutcome::UpToDate) => self.options.poll_interval,
                Ok(PollOutcome::Processed {
                    first_block,
                    last_block,
                }) => {
                    info!(first_block, last_block, "new blocks processed");
                    self.options.poll_interval
                }
                Err(err) => {
                    error!(
                        next_block = ?self.next_block,
                        error = ?err,
                        "realtime poll failed"
                    );
                    self.options.poll_interval * 2
                }
            };

            tokio::select! {
                _ = ct.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        reporter_ct.cancel();
        if let Err(err) = reporter.await {
            warn!(error = ?err, "progress reporter task failed");
        }

        info!(
            last_processed_block = ?self.last_processed_block(),
            "realtime sync stopped"
        );
        let progress = self.progress.snapshot();
        progress.log(&name);
        Ok(progress)
    }
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            block_cooldown: Duration::from_secs(1),
            starting_block: None,
            report_interval: Duration::from_secs(30),
        }
    }
}
