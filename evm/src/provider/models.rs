//! JSON-RPC response types and their conversion to the chain types.
use alloy_primitives::{Address, B256, U64};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tradesync_common::chain::{Block, BlockTransactions, SettlementLog, Transaction};

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Value,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: U64,
    pub hash: B256,
    pub timestamp: U64,
    #[serde(default)]
    pub transactions: RpcBlockTransactions,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RpcBlockTransactions {
    Full(Vec<RpcTransaction>),
    Hashes(Vec<B256>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub block_number: Option<U64>,
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub removed: bool,
}

/// Filter for `eth_getLogs`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub from_block: String,
    pub to_block: String,
    pub address: Address,
    pub topics: Vec<B256>,
}

impl Default for RpcBlockTransactions {
    fn default() -> Self {
        RpcBlockTransactions::Hashes(Vec::new())
    }
}

impl From<RpcBlock> for Block {
    fn from(block: RpcBlock) -> Self {
        let transactions = match block.transactions {
            RpcBlockTransactions::Full(transactions) => BlockTransactions::Full(
                transactions.into_iter().map(Transaction::from).collect(),
            ),
            RpcBlockTransactions::Hashes(hashes) => BlockTransactions::Hashes(hashes),
        };

        Block {
            number: block.number.to::<u64>(),
            hash: block.hash,
            timestamp: block.timestamp.to::<u64>(),
            transactions,
        }
    }
}

impl From<RpcTransaction> for Transaction {
    fn from(tx: RpcTransaction) -> Self {
        Transaction {
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
        }
    }
}

impl RpcLog {
    /// Returns the settlement log, or `None` for pending or removed logs.
    pub fn into_settlement_log(self) -> Option<SettlementLog> {
        if self.removed {
            return None;
        }

        Some(SettlementLog {
            block_number: self.block_number?.to::<u64>(),
            transaction_hash: self.transaction_hash?,
            address: self.address,
        })
    }
}

/// Format a block number as a JSON-RPC quantity.
pub fn quantity(number: u64) -> String {
    format!("{:#x}", number)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tradesync_common::chain::{Block, BlockTransactions};

    use super::{quantity, RpcBlock, RpcLog};

    #[test]
    fn test_block_with_transactions() {
        let block: RpcBlock = serde_json::from_value(json!({
            "number": "0x12a05f2",
            "hash": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "timestamp": "0x65a8e4d0",
            "miner": "0x95222290dd7278aa3ddd389cc1e1d165cc4bafe5",
            "transactions": [
                {
                    "hash": "0x0202020202020202020202020202020202020202020202020202020202020202",
                    "from": "0x1111111111111111111111111111111111111111",
                    "to": "0x9008d19f58aabd9ed0d60971565aa8510560ab41",
                    "value": "0x0"
                },
                {
                    "hash": "0x0303030303030303030303030303030303030303030303030303030303030303",
                    "from": "0x1111111111111111111111111111111111111111",
                    "to": null
                }
            ]
        }))
        .unwrap();

        let block = Block::from(block);
        assert_eq!(block.number, 19_530_226);
        assert_eq!(block.timestamp, 0x65a8e4d0);
        assert_eq!(block.full_transactions().len(), 2);
        assert!(block.full_transactions()[1].to.is_none());
    }

    #[test]
    fn test_block_with_hashes() {
        let block: RpcBlock = serde_json::from_value(json!({
            "number": "0x1",
            "hash": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "timestamp": "0x0",
            "transactions": [
                "0x0202020202020202020202020202020202020202020202020202020202020202"
            ]
        }))
        .unwrap();

        let block = Block::from(block);
        assert!(matches!(block.transactions, BlockTransactions::Hashes(ref h) if h.len() == 1));
        assert!(block.full_transactions().is_empty());
    }

    #[test]
    fn test_removed_log_is_ignored() {
        let log: RpcLog = serde_json::from_value(json!({
            "address": "0x9008d19f58aabd9ed0d60971565aa8510560ab41",
            "blockNumber": "0x10",
            "transactionHash": "0x0202020202020202020202020202020202020202020202020202020202020202",
            "removed": true
        }))
        .unwrap();
        assert!(log.into_settlement_log().is_none());

        let pending: RpcLog = serde_json::from_value(json!({
            "address": "0x9008d19f58aabd9ed0d60971565aa8510560ab41",
            "blockNumber": null,
            "transactionHash": null
        }))
        .unwrap();
        assert!(pending.into_settlement_log().is_none());
    }

    #[test]
    fn test_quantity() {
        assert_eq!(quantity(0), "0x0");
        assert_eq!(quantity(100), "0x64");
    }
}
