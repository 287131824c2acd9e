//! The block processing pipeline shared by the sync controllers.
//!
//! For each block: fetch it, select the settlement transactions, skip the
//! transactions already stored, fetch their order fills and store one record
//! per fill.
use std::time::Duration;

use error_stack::{Report, Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backoff::Backoff,
    chain::{BlockSource, BlockSourceError, BlockSourceErrorExt},
    error::SyncError,
    network::NetworkConfig,
    order::OrderSource,
    progress::SyncProgress,
    settlement::{filter_settlements, SettlementTransaction},
    store::TradeStore,
    trade::TradeRecord,
};

/// Order in which blocks are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the highest block to the lowest.
    Descending,
    /// From the lowest block to the highest.
    Ascending,
}

/// What to do when a block fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure and move to the next block.
    Continue,
    /// Stop the walk and return the error.
    Stop,
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub direction: Direction,
    pub failure_policy: FailurePolicy,
    /// Pause between two blocks. No pause after the last block.
    pub block_cooldown: Duration,
    /// Stop between blocks, and during cooldowns, when cancelled.
    pub interruptible: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkOutcome {
    /// Number of blocks visited.
    pub blocks: u64,
    /// Last block visited.
    pub last_block: Option<u64>,
    /// Whether the walk stopped early because it was cancelled.
    pub cancelled: bool,
}

/// Counts for one processed block or settlement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessedCounts {
    pub settlements: usize,
    pub saved: usize,
    pub skipped: usize,
}

/// Turns blocks into stored trade records.
pub struct BlockPipeline<B, O, S> {
    network: NetworkConfig,
    blocks: B,
    orders: O,
    store: S,
    backoff: Backoff,
}

impl<B, O, S> BlockPipeline<B, O, S>
where
    B: BlockSource,
    O: OrderSource,
    S: TradeStore,
{
    pub fn new(network: NetworkConfig, blocks: B, orders: O, store: S, backoff: Backoff) -> Self {
        Self {
            network,
            blocks,
            orders,
            store,
            backoff,
        }
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the head of the chain, retrying transient failures.
    pub async fn latest_block_number(&self) -> Result<u64, BlockSourceError> {
        self.backoff
            .retry("latest_block_number", || self.blocks.latest_block_number())
            .await
    }

    /// Visit all blocks between `start` and `end` (inclusive) in the given direction.
    ///
    /// With [FailurePolicy::Stop], the first failing block ends the walk with
    /// an error, and the caller counts the processed blocks once the walk
    /// is committed. With [FailurePolicy::Continue] the walk never fails and
    /// counts each block as it goes.
    pub async fn walk(
        &self,
        start: u64,
        end: u64,
        options: &WalkOptions,
        progress: &SyncProgress,
        ct: &CancellationToken,
    ) -> Result<WalkOutcome, SyncError> {
        let mut outcome = WalkOutcome::default();
        if start > end {
            return Ok(outcome);
        }

        let mut numbers: Box<dyn Iterator<Item = u64> + Send> = match options.direction {
            Direction::Ascending => Box::new(start..=end),
            Direction::Descending => Box::new((start..=end).rev()),
        };
        let mut next = numbers.next();

        while let Some(number) = next {
            if options.interruptible && ct.is_cancelled() {
                info!(network = %self.network.name, block = number, "walk interrupted");
                outcome.cancelled = true;
                break;
            }

            if let Err(err) = self.process_block(number, progress).await {
                record_failure(progress, &err);
                match options.failure_policy {
                    FailurePolicy::Continue => {
                        error!(
                            network = %self.network.name,
                            block = number,
                            error = ?err,
                            "failed to process block"
                        );
                    }
                    FailurePolicy::Stop => return Err(err),
                }
            }

            if options.failure_policy == FailurePolicy::Continue {
                progress.block_processed(number);
            }
            outcome.blocks += 1;
            outcome.last_block = Some(number);

            next = numbers.next();
            if next.is_some() && !options.block_cooldown.is_zero() {
                let interrupt = options.interruptible.then_some(ct);
                if !cooldown(options.block_cooldown, progress, interrupt).await {
                    outcome.cancelled = true;
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// Fetch block `number` and store the trades of its settlements.
    ///
    /// A block that doesn't exist is processed as an empty block.
    #[instrument(skip(self, progress), fields(network = %self.network.name), err(Debug))]
    pub async fn process_block(
        &self,
        number: u64,
        progress: &SyncProgress,
    ) -> Result<ProcessedCounts, SyncError> {
        let block = match self
            .backoff
            .retry("get_block", || self.blocks.get_block(number, true))
            .await
        {
            Ok(block) => block,
            Err(err) if err.is_not_found() => {
                debug!(block = number, "block not found, skipping");
                return Ok(ProcessedCounts::default());
            }
            Err(err) => {
                return Err(err)
                    .change_context(SyncError::BlockProcessing)
                    .attach_printable_lazy(|| format!("block number: {number}"));
            }
        };

        let settlements = filter_settlements(&block, self.network.settlement_contract);
        debug!(
            block = number,
            transactions = block.transaction_count(),
            settlements = settlements.len(),
            "block fetched"
        );

        let mut counts = ProcessedCounts::default();
        let mut store_failure = None;
        for settlement in &settlements {
            counts.settlements += 1;
            match self.process_settlement(settlement, progress).await {
                Ok(settlement_counts) => {
                    counts.saved += settlement_counts.saved;
                    counts.skipped += settlement_counts.skipped;
                }
                // Keep storing the other settlements of the block.
                Err(err) if err.current_context() == &SyncError::Store => {
                    store_failure.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }

        match store_failure {
            Some(err) => Err(err).attach_printable_lazy(|| format!("block number: {number}")),
            None => Ok(counts),
        }
    }

    /// Store the trades of one settlement transaction, unless already stored.
    ///
    /// Failing to fetch the order fills fails the settlement. Fills that are
    /// malformed or fail to be stored are logged and counted, and the other
    /// fills are still stored. The settlement then stays incomplete in the
    /// store, so it's processed again by the next run that visits it.
    /// Failed writes also fail the settlement with [SyncError::Store].
    pub async fn process_settlement(
        &self,
        settlement: &SettlementTransaction,
        progress: &SyncProgress,
    ) -> Result<ProcessedCounts, SyncError> {
        let mut counts = ProcessedCounts {
            settlements: 1,
            ..ProcessedCounts::default()
        };
        let tx_hash = format!("{:#x}", settlement.hash);

        match self.store.exists(&tx_hash).await {
            Ok(true) => {
                debug!(tx_hash = %tx_hash, block = settlement.block_number, "settlement already stored");
                progress.record_skipped();
                counts.skipped += 1;
                return Ok(counts);
            }
            Ok(false) => {}
            Err(err) => {
                // Records are replaced on write, so processing the settlement
                // again is safe.
                warn!(tx_hash = %tx_hash, error = ?err, "failed to check if settlement is stored");
            }
        }

        let orders = self
            .backoff
            .retry("fetch_order_fills", || {
                self.orders.fetch_order_fills(settlement.hash)
            })
            .await
            .change_context(SyncError::BlockProcessing)
            .attach_printable_lazy(|| format!("transaction hash: {tx_hash}"))
            .attach_printable_lazy(|| format!("block number: {}", settlement.block_number))?;

        if orders.is_empty() {
            debug!(tx_hash = %tx_hash, "settlement has no orders");
            return Ok(counts);
        }

        let malformed = orders.malformed();
        if malformed > 0 {
            warn!(tx_hash = %tx_hash, malformed, total = orders.total, "settlement has malformed orders");
            for _ in 0..malformed {
                progress.record_error();
            }
        }

        let mut failed_writes = 0u32;
        for (fill_index, fill) in &orders.fills {
            let fill_index = *fill_index;
            let record =
                match TradeRecord::from_fill(&self.network, settlement, fill_index, orders.total, fill)
                {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(tx_hash = %tx_hash, fill_index, error = ?err, "skipping invalid order fill");
                        progress.record_error();
                        continue;
                    }
                };

            match self.store.upsert(&record).await {
                Ok(()) => {
                    progress.record_saved();
                    counts.saved += 1;
                }
                Err(err) => {
                    error!(tx_hash = %tx_hash, fill_index, error = ?err, "failed to store trade");
                    progress.record_error();
                    failed_writes += 1;
                }
            }
        }

        info!(
            network = %self.network.name,
            tx_hash = %tx_hash,
            block = settlement.block_number,
            fills = orders.total,
            saved = counts.saved,
            "settlement stored"
        );

        if failed_writes > 0 {
            return Err(SyncError::Store)
                .attach_printable(format!("{failed_writes} of {} fills not stored", orders.total))
                .attach_printable(format!("transaction hash: {tx_hash}"));
        }

        Ok(counts)
    }
}

/// Count a failed block or settlement.
///
/// Store failures are counted per fill by [BlockPipeline::process_settlement].
pub(crate) fn record_failure(progress: &SyncProgress, err: &Report<SyncError>) {
    if err.current_context() != &SyncError::Store {
        progress.record_error();
    }
}

/// Sleep for `duration`, flagging the progress as waiting.
///
/// Returns false if `ct` was cancelled before the end of the cooldown.
pub async fn cooldown(
    duration: Duration,
    progress: &SyncProgress,
    ct: Option<&CancellationToken>,
) -> bool {
    debug!(duration = ?duration, "cooldown");
    progress.begin_wait(duration);

    let completed = match ct {
        Some(ct) => {
            tokio::select! {
                _ = ct.cancelled() => false,
                _ = tokio::time::sleep(duration) => true,
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            true
        }
    };

    progress.end_wait();
    completed
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use assert_matches::assert_matches;
    use tokio_util::sync::CancellationToken;

    use crate::{
        backoff::{Backoff, BackoffOptions},
        chain::BlockSourceError,
        error::SyncError,
        network::NetworkConfig,
        order::SettlementOrders,
        progress::SyncProgress,
        testing::{new_fill, settlement_hash, FakeChain, FakeOrderSource, MemoryTradeStore},
        trade::record_key,
    };

    use super::{BlockPipeline, Direction, FailurePolicy, WalkOptions};

    type TestPipeline =
        BlockPipeline<Arc<FakeChain>, Arc<FakeOrderSource>, Arc<MemoryTradeStore>>;

    struct Fixture {
        chain: Arc<FakeChain>,
        orders: Arc<FakeOrderSource>,
        store: Arc<MemoryTradeStore>,
        pipeline: TestPipeline,
    }

    fn fixture(head: u64) -> Fixture {
        let network = NetworkConfig::test("mainnet", 1);
        let chain = Arc::new(FakeChain::new(&network, head));
        let orders = Arc::new(FakeOrderSource::default());
        let store = Arc::new(MemoryTradeStore::default());
        let backoff = Backoff::new(BackoffOptions {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2,
            jitter: None,
        });
        let pipeline =
            BlockPipeline::new(network, chain.clone(), orders.clone(), store.clone(), backoff);
        Fixture {
            chain,
            orders,
            store,
            pipeline,
        }
    }

    fn options(direction: Direction, failure_policy: FailurePolicy) -> WalkOptions {
        WalkOptions {
            direction,
            failure_policy,
            block_cooldown: Duration::from_secs(1),
            interruptible: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_walk_descending_visits_every_block_once() {
        let f = fixture(110);
        let progress = SyncProgress::new();
        let ct = CancellationToken::new();
        let started_at = tokio::time::Instant::now();

        let outcome = f
            .pipeline
            .walk(
                100,
                105,
                &options(Direction::Descending, FailurePolicy::Continue),
                &progress,
                &ct,
            )
            .await
            .unwrap();

        assert_eq!(f.chain.visits(), vec![105, 104, 103, 102, 101, 100]);
        assert_eq!(outcome.blocks, 6);
        assert_eq!(outcome.last_block, Some(100));
        // No cooldown after the last block.
        assert_eq!(started_at.elapsed(), Duration::from_secs(5));
        assert!(!progress.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_walk_ascending() {
        let f = fixture(110);
        let progress = SyncProgress::new();
        let ct = CancellationToken::new();

        f.pipeline
            .walk(
                108,
                110,
                &options(Direction::Ascending, FailurePolicy::Stop),
                &progress,
                &ct,
            )
            .await
            .unwrap();

        assert_eq!(f.chain.visits(), vec![108, 109, 110]);
        // Stopping walks leave the block count to the caller.
        assert_eq!(progress.snapshot().processed_blocks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_block_stores_one_record_per_fill() {
        let f = fixture(100);
        let hash = settlement_hash(100, 1);
        f.chain.add_settlement(100, hash);
        f.orders.add_fills(hash, vec![new_fill(10), new_fill(20)]);
        let progress = SyncProgress::new();

        let counts = f.pipeline.process_block(100, &progress).await.unwrap();

        assert_eq!(counts.settlements, 1);
        assert_eq!(counts.saved, 2);
        let records = f.store.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.block_number == 100));
        assert_eq!(records[0].fill_index, 0);
        assert_eq!(records[1].sell_amount, "20");
        // Only the settlement transaction is enriched.
        assert_eq!(f.orders.calls(), vec![hash]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_twice_is_idempotent() {
        let f = fixture(100);
        let hash = settlement_hash(99, 1);
        f.chain.add_settlement(99, hash);
        f.orders.add_fills(hash, vec![new_fill(10)]);
        let progress = SyncProgress::new();

        f.pipeline.process_block(99, &progress).await.unwrap();
        let first = f.store.records();
        let counts = f.pipeline.process_block(99, &progress).await.unwrap();

        assert_eq!(counts.skipped, 1);
        assert_eq!(f.store.records(), first);
        assert_eq!(f.orders.calls().len(), 1);
        assert_eq!(progress.snapshot().skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_block_is_empty() {
        let f = fixture(100);
        let progress = SyncProgress::new();

        let counts = f.pipeline.process_block(101, &progress).await.unwrap();
        assert_eq!(counts.settlements, 0);
        // Not found is not retried.
        assert_eq!(f.chain.visits(), vec![101]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let f = fixture(100);
        f.chain.fail_block(100, 2, BlockSourceError::RateLimited);
        let progress = SyncProgress::new();

        f.pipeline.process_block(100, &progress).await.unwrap();
        assert_eq!(f.chain.visits(), vec![100, 100, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_past_failed_block() {
        let f = fixture(100);
        f.chain.fail_block(98, 10, BlockSourceError::ServerError);
        let hash = settlement_hash(97, 1);
        f.chain.add_settlement(97, hash);
        f.orders.add_fills(hash, vec![new_fill(1)]);
        let progress = SyncProgress::new();
        let ct = CancellationToken::new();

        let outcome = f
            .pipeline
            .walk(
                97,
                99,
                &options(Direction::Descending, FailurePolicy::Continue),
                &progress,
                &ct,
            )
            .await
            .unwrap();

        assert_eq!(outcome.blocks, 3);
        assert_eq!(f.store.len(), 1);
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.saved, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_failed_block() {
        let f = fixture(100);
        f.chain.fail_block(99, 10, BlockSourceError::DeserializeResponse);
        let progress = SyncProgress::new();
        let ct = CancellationToken::new();

        let result = f
            .pipeline
            .walk(
                98,
                100,
                &options(Direction::Ascending, FailurePolicy::Stop),
                &progress,
                &ct,
            )
            .await;

        let err = result.unwrap_err();
        assert_matches!(err.current_context(), SyncError::BlockProcessing);
        assert_eq!(f.chain.visits(), vec![98, 99]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_fails_the_block() {
        let f = fixture(100);
        let hash = settlement_hash(100, 1);
        f.chain.add_settlement(100, hash);
        f.orders.add_fills(hash, vec![new_fill(1), new_fill(2)]);
        f.store.fail_writes(true);
        let progress = SyncProgress::new();

        let err = f.pipeline.process_block(100, &progress).await.unwrap_err();
        assert_matches!(err.current_context(), SyncError::Store);
        assert_eq!(f.store.len(), 0);
        assert_eq!(progress.snapshot().errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partially_stored_settlement_is_completed() {
        let f = fixture(100);
        let hash = settlement_hash(100, 1);
        let other = settlement_hash(100, 2);
        f.chain.add_settlement(100, hash);
        f.chain.add_settlement(100, other);
        f.orders.add_fills(hash, vec![new_fill(1), new_fill(2)]);
        f.orders.add_fills(other, vec![new_fill(3)]);
        f.store.fail_next_write(record_key(&format!("{hash:#x}"), 1));
        let progress = SyncProgress::new();

        assert!(f.pipeline.process_block(100, &progress).await.is_err());
        // The other settlement of the block is still stored.
        assert_eq!(f.store.len(), 2);
        assert_eq!(progress.snapshot().errors, 1);

        let counts = f.pipeline.process_block(100, &progress).await.unwrap();
        assert_eq!(counts.saved, 2);
        assert_eq!(counts.skipped, 1);

        let records = f.store.records();
        assert_eq!(records.len(), 3);
        assert!(records
            .iter()
            .any(|r| r.transaction_hash == format!("{hash:#x}") && r.fill_index == 1));
        assert_eq!(f.orders.calls(), vec![hash, other, hash]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_counts_store_failures_once() {
        let f = fixture(100);
        let hash = settlement_hash(99, 1);
        f.chain.add_settlement(99, hash);
        f.orders.add_fills(hash, vec![new_fill(1)]);
        f.store.fail_writes(true);
        let progress = SyncProgress::new();
        let ct = CancellationToken::new();

        f.pipeline
            .walk(
                98,
                100,
                &options(Direction::Descending, FailurePolicy::Continue),
                &progress,
                &ct,
            )
            .await
            .unwrap();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.processed_blocks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_orders_keep_fill_indexes() {
        let f = fixture(100);
        let hash = settlement_hash(100, 1);
        f.chain.add_settlement(100, hash);
        f.orders.add_orders(
            hash,
            SettlementOrders {
                fills: vec![(2, new_fill(7))],
                total: 3,
            },
        );
        let progress = SyncProgress::new();

        let counts = f.pipeline.process_block(100, &progress).await.unwrap();
        assert_eq!(counts.saved, 1);
        assert_eq!(progress.snapshot().errors, 2);

        let records = f.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fill_index, 2);
        assert_eq!(records[0].fill_count, 3);

        // The settlement is incomplete, the next visit fetches it again.
        f.pipeline.process_block(100, &progress).await.unwrap();
        assert_eq!(f.orders.calls(), vec![hash, hash]);
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settlement_without_orders() {
        let f = fixture(100);
        let hash = settlement_hash(100, 1);
        f.chain.add_settlement(100, hash);
        let progress = SyncProgress::new();

        let counts = f.pipeline.process_block(100, &progress).await.unwrap();

        assert_eq!(counts.settlements, 1);
        assert_eq!(counts.saved, 0);
        assert_eq!(f.orders.calls(), vec![hash]);
        assert_eq!(f.store.len(), 0);
        assert_eq!(progress.snapshot().errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_walk_stops_when_cancelled() {
        let f = fixture(100);
        let progress = Arc::new(SyncProgress::new());
        let ct = CancellationToken::new();

        let walk = {
            let ct = ct.clone();
            let progress = progress.clone();
            async move {
                f.pipeline
                    .walk(
                        0,
                        100,
                        &options(Direction::Descending, FailurePolicy::Continue),
                        &progress,
                        &ct,
                    )
                    .await
                    .map(|outcome| (outcome, f.chain.visits()))
            }
        };

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            ct.cancel();
        };

        let (result, _) = tokio::join!(walk, cancel);
        let (outcome, visits) = result.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(visits, vec![100, 99, 98]);
        assert_eq!(outcome.last_block, Some(98));
    }
}
