//! Backfill by scanning settlement events over block ranges.
//!
//! Much faster than visiting every block, at the cost of relying on the
//! provider's log index. Ranges the provider refuses are split in halves
//! until they reach the minimum chunk size.
use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    chain::{BlockSource, BlockSourceErrorExt, SettlementLogSource},
    error::SyncError,
    historical::target_block,
    order::OrderSource,
    pipeline::{cooldown, record_failure, BlockPipeline},
    progress::{spawn_reporter, ProgressSnapshot, SyncProgress},
    settlement::settlements_from_logs,
    store::TradeStore,
};

/// An inclusive range of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

/// Queue of block ranges to scan, in ascending order.
#[derive(Debug)]
pub struct BlockRangeQueue {
    ranges: VecDeque<BlockRange>,
    min_chunk_size: u64,
}

#[derive(Debug, Clone)]
pub struct LogScanOptions {
    /// How far back in time to scan.
    pub lookback: Duration,
    /// Number of blocks requested at once.
    pub chunk_size: u64,
    /// Ranges are never split below this size.
    pub min_chunk_size: u64,
    /// Pause between two ranges.
    pub range_cooldown: Duration,
    /// How often to log the progress.
    pub report_interval: Duration,
}

pub struct LogScanSync<L, B, O, S> {
    logs: L,
    pipeline: BlockPipeline<B, O, S>,
    options: LogScanOptions,
    progress: Arc<SyncProgress>,
}

#[derive(Debug, Clone)]
pub struct LogScanSummary {
    pub latest_block: u64,
    pub target_block: u64,
    pub cancelled: bool,
    pub progress: ProgressSnapshot,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Split the range in two halves, if both have at least `min_size` blocks.
    pub fn split(&self, min_size: u64) -> Option<(BlockRange, BlockRange)> {
        let half = self.len() / 2;
        if half < min_size.max(1) {
            return None;
        }

        let mid = self.start + half - 1;
        Some((
            BlockRange::new(self.start, mid),
            BlockRange::new(mid + 1, self.end),
        ))
    }
}

impl BlockRangeQueue {
    /// Covers `[start, end]` with ranges of at most `chunk_size` blocks.
    pub fn new(start: u64, end: u64, chunk_size: u64, min_chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut ranges = VecDeque::new();
        let mut current = start;
        while current <= end {
            let range_end = current.saturating_add(chunk_size - 1).min(end);
            ranges.push_back(BlockRange::new(current, range_end));
            if range_end == u64::MAX {
                break;
            }
            current = range_end + 1;
        }

        Self {
            ranges,
            min_chunk_size,
        }
    }

    pub fn pop(&mut self) -> Option<BlockRange> {
        self.ranges.pop_front()
    }

    /// Split `range` and put its halves at the front of the queue.
    ///
    /// Returns false if the range is already at the minimum size.
    pub fn split_front(&mut self, range: BlockRange) -> bool {
        match range.split(self.min_chunk_size) {
            Some((low, high)) => {
                self.ranges.push_front(high);
                self.ranges.push_front(low);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl<L, B, O, S> LogScanSync<L, B, O, S>
where
    L: SettlementLogSource,
    B: BlockSource,
    O: OrderSource,
    S: TradeStore,
{
    pub fn new(logs: L, pipeline: BlockPipeline<B, O, S>, options: LogScanOptions) -> Self {
        Self {
            logs,
            pipeline,
            options,
            progress: Arc::new(SyncProgress::new()),
        }
    }

    #[instrument(skip_all, fields(network = %self.pipeline.network().name))]
    pub async fn run(&self, ct: CancellationToken) -> Result<LogScanSummary, SyncError> {
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

        let mut queue = BlockRangeQueue::new(
            target_block,
            latest_block,
            self.options.chunk_size,
            self.options.min_chunk_size,
        );
        self.progress.set_total_blocks(latest_block - target_block + 1);

        info!(
            network = %network.name,
            latest_block,
            target_block,
            ranges = queue.len(),
            "starting settlement log scan"
        );

        let name = format!("scan-logs:{}", network.name);
        let reporter_ct = ct.child_token();
        let reporter = spawn_reporter(
            name.clone(),
            self.progress.clone(),
            self.options.report_interval,
            reporter_ct.clone(),
        );

        let mut cancelled = false;
        while let Some(range) = queue.pop() {
            if ct.is_cancelled() {
                cancelled = true;
                break;
            }

            self.scan_range(range, &mut queue).await;

            if !queue.is_empty()
                && !self.options.range_cooldown.is_zero()
                && !cooldown(self.options.range_cooldown, &self.progress, Some(&ct)).await
            {
                cancelled = true;
                break;
            }
        }

        reporter_ct.cancel();
        if let Err(err) = reporter.await {
            warn!(error = ?err, "progress reporter task failed");
        }

        let progress = self.progress.snapshot();
        info!(network = %network.name, cancelled, "settlement log scan finished");
        progress.log(&name);

        Ok(LogScanSummary {
            latest_block,
            target_block,
            cancelled,
            progress,
        })
    }

    async fn scan_range(&self, range: BlockRange, queue: &mut BlockRangeQueue) {
        let contract = self.pipeline.network().settlement_contract;
        let logs = self
            .pipeline
            .backoff()
            .retry("get_settlement_logs", || {
                self.logs
                    .get_settlement_logs(range.start, range.end, contract)
            })
            .await;

        let logs = match logs {
            Ok(logs) => logs,
            Err(err) if err.is_range_too_large() => {
                if queue.split_front(range) {
                    debug!(%range, "range too large, splitting");
                } else {
                    error!(%range, error = ?err, "range too large and can't be split, skipping");
                    self.progress.record_error();
                    self.progress.blocks_processed(range.len(), range.end);
                }
                return;
            }
            Err(err) => {
                error!(%range, error = ?err, "failed to fetch settlement logs, skipping range");
                self.progress.record_error();
                self.progress.blocks_processed(range.len(), range.end);
                return;
            }
        };

        let settlements = settlements_from_logs(&logs);
        debug!(%range, logs = logs.len(), settlements = settlements.len(), "range scanned");

        for settlement in &settlements {
            if let Err(err) = self
                .pipeline
                .process_settlement(settlement, &self.progress)
                .await
            {
                warn!(
                    block = settlement.block_number,
                    error = ?err,
                    "failed to process settlement"
                );
                record_failure(&self.progress, &err);
            }
        }

        self.progress.blocks_processed(range.len(), range.end);
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl Default for LogScanOptions {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(24 * 60 * 60),
            chunk_size: 2_000,
            min_chunk_size: 10,
            range_cooldown: Duration::from_secs(1),
            report_interval: Duration::from_secs(30),
        }
    }
}
