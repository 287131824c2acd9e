//! Blocks and the sources they come from.
use std::{fmt, sync::Arc};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use error_stack::{Report, Result};

use crate::backoff::{RetryHint, Retryable};

/// A block, as returned by the block source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
    pub transactions: BlockTransactions,
}

/// The block transactions, either the full bodies or only their hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockTransactions {
    Hashes(Vec<B256>),
    Full(Vec<Transaction>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: B256,
    pub from: Address,
    /// The recipient. `None` for contract creations.
    pub to: Option<Address>,
}

/// A settlement event emitted by the settlement contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementLog {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSourceError {
    /// The request could not be sent or the connection dropped.
    Request,
    /// The request timed out.
    Timeout,
    /// The provider is rate limiting us.
    RateLimited,
    /// The provider returned a 5xx status.
    ServerError,
    /// The requested block doesn't exist (yet).
    NotFound,
    /// The requested block range is too large for the provider.
    RangeTooLarge,
    /// The node returned a JSON-RPC error.
    Rpc,
    /// The response couldn't be decoded.
    DeserializeResponse,
    /// The source is misconfigured.
    Configuration,
}

/// Read blocks from a chain.
///
/// Implementations don't retry. Callers wrap calls with [crate::backoff::Backoff].
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Returns the number of the most recent block.
    async fn latest_block_number(&self) -> Result<u64, BlockSourceError>;

    /// Returns the block with the given number.
    ///
    /// Fails with [BlockSourceError::NotFound] if the block doesn't exist.
    async fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> Result<Block, BlockSourceError>;
}

/// Read settlement events over a range of blocks.
#[async_trait]
pub trait SettlementLogSource: Send + Sync {
    /// Returns the settlement events emitted by `contract` between blocks
    /// `from` and `to`, inclusive.
    ///
    /// Fails with [BlockSourceError::RangeTooLarge] if the provider refuses
    /// the range.
    async fn get_settlement_logs(
        &self,
        from: u64,
        to: u64,
        contract: Address,
    ) -> Result<Vec<SettlementLog>, BlockSourceError>;
}

#[async_trait]
impl<T> BlockSource for Arc<T>
where
    T: BlockSource + ?Sized,
{
    async fn latest_block_number(&self) -> Result<u64, BlockSourceError> {
        self.as_ref().latest_block_number().await
    }

    async fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> Result<Block, BlockSourceError> {
        self.as_ref().get_block(number, include_transactions).await
    }
}

#[async_trait]
impl<T> SettlementLogSource for Arc<T>
where
    T: SettlementLogSource + ?Sized,
{
    async fn get_settlement_logs(
        &self,
        from: u64,
        to: u64,
        contract: Address,
    ) -> Result<Vec<SettlementLog>, BlockSourceError> {
        self.as_ref().get_settlement_logs(from, to, contract).await
    }
}

pub trait BlockSourceErrorExt {
    fn is_not_found(&self) -> bool;
    fn is_range_too_large(&self) -> bool;
}

impl Block {
    /// Returns the full transactions of the block, if they were requested.
    pub fn full_transactions(&self) -> &[Transaction] {
        match &self.transactions {
            BlockTransactions::Full(transactions) => transactions,
            BlockTransactions::Hashes(_) => &[],
        }
    }

    pub fn transaction_count(&self) -> usize {
        match &self.transactions {
            BlockTransactions::Full(transactions) => transactions.len(),
            BlockTransactions::Hashes(hashes) => hashes.len(),
        }
    }
}

impl Default for BlockTransactions {
    fn default() -> Self {
        BlockTransactions::Hashes(Vec::new())
    }
}

impl error_stack::Context for BlockSourceError {}

impl fmt::Display for BlockSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockSourceError::Request => write!(f, "failed to send request"),
            BlockSourceError::Timeout => write!(f, "request timed out"),
            BlockSourceError::RateLimited => write!(f, "rate limited by provider"),
            BlockSourceError::ServerError => write!(f, "provider server error"),
            BlockSourceError::NotFound => write!(f, "not found"),
            BlockSourceError::RangeTooLarge => write!(f, "block range too large"),
            BlockSourceError::Rpc => write!(f, "json-rpc error"),
            BlockSourceError::DeserializeResponse => write!(f, "failed to deserialize response"),
            BlockSourceError::Configuration => write!(f, "configuration error"),
        }
    }
}

impl Retryable for BlockSourceError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            BlockSourceError::Request
            | BlockSourceError::Timeout
            | BlockSourceError::RateLimited
            | BlockSourceError::ServerError => RetryHint::Retryable,
            // Range errors are handled by splitting the range, not by retrying it.
            BlockSourceError::NotFound
            | BlockSourceError::RangeTooLarge
            | BlockSourceError::DeserializeResponse
            | BlockSourceError::Configuration => RetryHint::Fatal,
            BlockSourceError::Rpc => RetryHint::Unknown,
        }
    }
}

impl BlockSourceErrorExt for Report<BlockSourceError> {
    fn is_not_found(&self) -> bool {
        matches!(self.current_context(), BlockSourceError::NotFound)
    }

    fn is_range_too_large(&self) -> bool {
        matches!(self.current_context(), BlockSourceError::RangeTooLarge)
    }
}
