use alloy_primitives::{Address, B256};

use crate::chain::{Block, SettlementLog};

/// A transaction sent to the settlement contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementTransaction {
    pub hash: B256,
    pub block_number: u64,
    pub to: Address,
}

/// Returns the transactions in `block` sent to the settlement `contract`.
///
/// Addresses are compared as bytes, so the comparison doesn't depend on the
/// case of their hex representation.
pub fn filter_settlements(block: &Block, contract: Address) -> Vec<SettlementTransaction> {
    block
        .full_transactions()
        .iter()
        .filter(|tx| tx.to == Some(contract))
        .map(|tx| SettlementTransaction {
            hash: tx.hash,
            block_number: block.number,
            to: contract,
        })
        .collect()
}

/// Turns settlement events into settlement transactions.
///
/// A transaction can emit more than one event; it's returned only once, in
/// the order of its first event.
pub fn settlements_from_logs(logs: &[SettlementLog]) -> Vec<SettlementTransaction> {
    let mut settlements: Vec<SettlementTransaction> = Vec::with_capacity(logs.len());
    for log in logs {
        if settlements.iter().any(|s| s.hash == log.transaction_hash) {
            continue;
        }

        settlements.push(SettlementTransaction {
            hash: log.transaction_hash,
            block_number: log.block_number,
            to: log.address,
        });
    }
    settlements
}
