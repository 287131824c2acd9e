//! In-memory sources and store used to test the sync controllers.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use error_stack::{Report, Result, ResultExt};

use crate::{
    chain::{
        Block, BlockSource, BlockSourceError, BlockTransactions, SettlementLog,
        SettlementLogSource, Transaction,
    },
    network::NetworkConfig,
    order::{OrderFill, OrderKind, OrderSource, OrderSourceError, SettlementOrders},
    store::{StoreError, TradeStore},
    trade::TradeRecord,
};

pub fn settlement_hash(block_number: u64, index: u8) -> B256 {
    let mut hash = B256::repeat_byte(index);
    hash[..8].copy_from_slice(&block_number.to_be_bytes());
    hash
}

pub fn block_hash(number: u64) -> B256 {
    let mut hash = B256::ZERO;
    hash[24..].copy_from_slice(&number.to_be_bytes());
    hash
}

pub fn new_fill(amount: u64) -> OrderFill {
    OrderFill {
        uid: None,
        owner: None,
        sell_token: Address::repeat_byte(0x01),
        buy_token: Address::repeat_byte(0x02),
        sell_amount: amount.to_string(),
        buy_amount: (amount * 2).to_string(),
        executed_sell_amount: amount.to_string(),
        executed_sell_amount_before_fees: amount.to_string(),
        executed_buy_amount: (amount * 2).to_string(),
        receiver: None,
        kind: OrderKind::Sell,
        creation_date: None,
    }
}

/// A chain where every block up to the head exists.
///
/// Blocks contain one settlement per entry registered with
/// [FakeChain::add_settlement] plus one unrelated transaction.
#[derive(Debug)]
pub struct FakeChain {
    contract: Address,
    head: AtomicU64,
    settlements: Mutex<HashMap<u64, Vec<B256>>>,
    failures: Mutex<HashMap<u64, (u32, BlockSourceError)>>,
    visits: Mutex<Vec<u64>>,
    log_requests: Mutex<Vec<(u64, u64)>>,
    max_log_range: AtomicU64,
}

impl FakeChain {
    pub fn new(network: &NetworkConfig, head: u64) -> Self {
        Self {
            contract: network.settlement_contract,
            head: AtomicU64::new(head),
            settlements: Mutex::default(),
            failures: Mutex::default(),
            visits: Mutex::default(),
            log_requests: Mutex::default(),
            max_log_range: AtomicU64::new(u64::MAX),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn add_settlement(&self, block_number: u64, hash: B256) {
        self.settlements
            .lock()
            .unwrap()
            .entry(block_number)
            .or_default()
            .push(hash);
    }

    /// Fail the next `count` requests for block `number` with `error`.
    pub fn fail_block(&self, number: u64, count: u32, error: BlockSourceError) {
        self.failures.lock().unwrap().insert(number, (count, error));
    }

    /// Refuse log requests over more than `max` blocks.
    pub fn set_max_log_range(&self, max: u64) {
        self.max_log_range.store(max, Ordering::SeqCst);
    }

    /// Block numbers requested, in order.
    pub fn visits(&self) -> Vec<u64> {
        self.visits.lock().unwrap().clone()
    }

    pub fn log_requests(&self) -> Vec<(u64, u64)> {
        self.log_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlockSource for FakeChain {
    async fn latest_block_number(&self) -> Result<u64, BlockSourceError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> Result<Block, BlockSourceError> {
        self.visits.lock().unwrap().push(number);

        if let Some((remaining, error)) = self.failures.lock().unwrap().get_mut(&number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Report::new(error.clone()))
                    .attach_printable(format!("block number: {number}"));
            }
        }

        if number > self.head.load(Ordering::SeqCst) {
            return Err(Report::new(BlockSourceError::NotFound));
        }

        let mut transactions = vec![Transaction {
            hash: B256::repeat_byte(0xee),
            from: Address::repeat_byte(0xaa),
            to: Some(Address::repeat_byte(0xbb)),
        }];
        if let Some(hashes) = self.settlements.lock().unwrap().get(&number) {
            transactions.extend(hashes.iter().map(|hash| Transaction {
                hash: *hash,
                from: Address::repeat_byte(0xaa),
                to: Some(self.contract),
            }));
        }

        let transactions = if include_transactions {
            BlockTransactions::Full(transactions)
        } else {
            BlockTransactions::Hashes(transactions.iter().map(|tx| tx.hash).collect())
        };

        Ok(Block {
            number,
            hash: block_hash(number),
            timestamp: number * 12,
            transactions,
        })
    }
}

#[async_trait]
impl SettlementLogSource for FakeChain {
    async fn get_settlement_logs(
        &self,
        from: u64,
        to: u64,
        contract: Address,
    ) -> Result<Vec<SettlementLog>, BlockSourceError> {
        self.log_requests.lock().unwrap().push((from, to));

        if to - from + 1 > self.max_log_range.load(Ordering::SeqCst) {
            return Err(Report::new(BlockSourceError::RangeTooLarge))
                .attach_printable(format!("range: {from}-{to}"));
        }

        let settlements = self.settlements.lock().unwrap();
        let mut logs = Vec::new();
        for number in from..=to {
            for hash in settlements.get(&number).into_iter().flatten() {
                // Two events per transaction, as for a settlement with two interactions.
                for _ in 0..2 {
                    logs.push(SettlementLog {
                        block_number: number,
                        transaction_hash: *hash,
                        address: contract,
                    });
                }
            }
        }
        Ok(logs)
    }
}

/// Settlement API returning the registered fills, or nothing.
#[derive(Debug, Default)]
pub struct FakeOrderSource {
    orders: Mutex<HashMap<B256, SettlementOrders>>,
    calls: Mutex<Vec<B256>>,
}

impl FakeOrderSource {
    pub fn add_fills(&self, hash: B256, fills: Vec<OrderFill>) {
        self.add_orders(hash, SettlementOrders::new(fills));
    }

    pub fn add_orders(&self, hash: B256, orders: SettlementOrders) {
        self.orders.lock().unwrap().insert(hash, orders);
    }

    pub fn calls(&self) -> Vec<B256> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderSource for FakeOrderSource {
    async fn fetch_order_fills(
        &self,
        tx_hash: B256,
    ) -> Result<SettlementOrders, OrderSourceError> {
        self.calls.lock().unwrap().push(tx_hash);
        Ok(self
            .orders
            .lock()
            .unwrap()
            .get(&tx_hash)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTradeStore {
    records: Mutex<BTreeMap<String, TradeRecord>>,
    fail_writes: AtomicBool,
    failing_keys: Mutex<HashSet<String>>,
}

impl MemoryTradeStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail the next write of the record with key `key`.
    pub fn fail_next_write(&self, key: String) {
        self.failing_keys.lock().unwrap().insert(key);
    }

    pub fn records(&self) -> Vec<TradeRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn exists(&self, transaction_hash: &str) -> Result<bool, StoreError> {
        let transaction_hash = transaction_hash.to_lowercase();
        let records = self.records.lock().unwrap();
        let stored = records
            .values()
            .filter(|record| record.transaction_hash == transaction_hash)
            .collect::<Vec<_>>();
        Ok(stored
            .first()
            .map_or(false, |record| stored.len() >= record.fill_count as usize))
    }

    async fn upsert(&self, record: &TradeRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Report::new(StoreError::Write));
        }
        if self.failing_keys.lock().unwrap().remove(&record.key()) {
            return Err(Report::new(StoreError::Write))
                .attach_printable(format!("key: {}", record.key()));
        }
        self.records
            .lock()
            .unwrap()
            .insert(record.key(), record.clone());
        Ok(())
    }

    async fn delete_before_block(&self, block_number: u64) -> Result<u64, StoreError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, record| record.block_number >= block_number);
        Ok((before - records.len()) as u64)
    }
}
