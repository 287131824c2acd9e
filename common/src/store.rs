//! Persistence of trade records.
use std::{fmt, sync::Arc};

use async_trait::async_trait;
use error_stack::Result;

use crate::{
    backoff::{RetryHint, Retryable},
    trade::TradeRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store can't be reached.
    Unavailable,
    /// The store is overloaded or a transient write conflict happened.
    Busy,
    /// Writing a record failed.
    Write,
    /// Reading records failed.
    Read,
    /// A record could not be converted to or from its stored form.
    Serialization,
    /// The store is misconfigured.
    Configuration,
}

/// Where trade records are stored, one keyspace per network.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Returns true if all the records of the transaction are stored.
    ///
    /// The number of records expected is the `fill_count` of the stored
    /// records.
    async fn exists(&self, transaction_hash: &str) -> Result<bool, StoreError>;

    /// Insert the record, or replace the stored record with the same key.
    async fn upsert(&self, record: &TradeRecord) -> Result<(), StoreError>;

    /// Delete all records with block number less than `block_number`.
    ///
    /// Returns the number of deleted records.
    async fn delete_before_block(&self, block_number: u64) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T> TradeStore for Arc<T>
where
    T: TradeStore + ?Sized,
{
    async fn exists(&self, transaction_hash: &str) -> Result<bool, StoreError> {
        self.as_ref().exists(transaction_hash).await
    }

    async fn upsert(&self, record: &TradeRecord) -> Result<(), StoreError> {
        self.as_ref().upsert(record).await
    }

    async fn delete_before_block(&self, block_number: u64) -> Result<u64, StoreError> {
        self.as_ref().delete_before_block(block_number).await
    }
}

impl error_stack::Context for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable => write!(f, "store unavailable"),
            StoreError::Busy => write!(f, "store busy"),
            StoreError::Write => write!(f, "failed to write record"),
            StoreError::Read => write!(f, "failed to read records"),
            StoreError::Serialization => write!(f, "failed to serialize record"),
            StoreError::Configuration => write!(f, "store configuration error"),
        }
    }
}

impl Retryable for StoreError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            StoreError::Unavailable | StoreError::Busy => RetryHint::Retryable,
            StoreError::Serialization | StoreError::Configuration => RetryHint::Fatal,
            StoreError::Write | StoreError::Read => RetryHint::Unknown,
        }
    }
}
