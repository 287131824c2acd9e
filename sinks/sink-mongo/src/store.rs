use async_trait::async_trait;
use error_stack::{Report, Result, ResultExt};
use mongodb::{
    bson::doc,
    error::{ErrorKind, RETRYABLE_WRITE_ERROR, TRANSIENT_TRANSACTION_ERROR},
    options::{ClientOptions, CountOptions, ReplaceOptions},
    Client, Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tradesync_common::{
    network::NetworkConfig,
    store::{StoreError, TradeStore},
    trade::TradeRecord,
};

use crate::configuration::MongoStoreOptions;

/// Connection to the database holding the trades of all networks.
#[derive(Debug, Clone)]
pub struct MongoStore {
    database: Database,
    collection_prefix: String,
}

/// The trades of one network.
#[derive(Debug, Clone)]
pub struct MongoTradeStore {
    collection: Collection<TradeDocument>,
}

/// How a trade record is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub record: TradeRecord,
}

trait MongoResultExt<T> {
    fn store_context(self, fallback: StoreError) -> Result<T, StoreError>;
}

impl MongoStore {
    /// Connect to the database and check that it's reachable.
    pub async fn connect(options: MongoStoreOptions) -> Result<Self, StoreError> {
        info!("connecting to database");
        let client_options = ClientOptions::parse(&options.connection_string)
            .await
            .change_context(StoreError::Configuration)
            .attach_printable("failed to parse mongo connection string")?;

        let client = Client::with_options(client_options)
            .change_context(StoreError::Configuration)
            .attach_printable("failed to create mongo client")?;

        let database = client.database(&options.database);
        database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .change_context(StoreError::Unavailable)
            .attach_printable("failed to ping mongo database")?;

        info!(database = %options.database, "connected to database");

        Ok(Self {
            database,
            collection_prefix: options.collection_prefix,
        })
    }

    pub fn collection_name(&self, network: &NetworkConfig) -> String {
        format!("{}_{}", self.collection_prefix, network.name)
    }

    /// Returns the store of `network`, creating its indexes if needed.
    pub async fn trade_store(&self, network: &NetworkConfig) -> Result<MongoTradeStore, StoreError> {
        let collection_name = self.collection_name(network);
        let store = MongoTradeStore {
            collection: self.database.collection(&collection_name),
        };

        store
            .ensure_indexes()
            .await
            .attach_printable_lazy(|| format!("collection: {collection_name}"))?;

        Ok(store)
    }
}

impl MongoTradeStore {
    /// Create the indexes on block number and transaction hash.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let indexes = vec![
            IndexModel::builder().keys(doc! { "blockNumber": 1 }).build(),
            IndexModel::builder()
                .keys(doc! { "transactionHash": 1 })
                .build(),
        ];

        self.collection
            .create_indexes(indexes, None)
            .await
            .store_context(StoreError::Write)
            .attach_printable("failed to create indexes")?;

        debug!(collection = self.collection.name(), "indexes created");
        Ok(())
    }

    pub fn collection(&self) -> &Collection<TradeDocument> {
        &self.collection
    }
}

#[async_trait]
impl TradeStore for MongoTradeStore {
    async fn exists(&self, transaction_hash: &str) -> Result<bool, StoreError> {
        let filter = doc! { "transactionHash": transaction_hash.to_lowercase() };

        let Some(document) = self
            .collection
            .find_one(filter.clone(), None)
            .await
            .store_context(StoreError::Read)
            .attach_printable_lazy(|| format!("transaction hash: {transaction_hash}"))?
        else {
            return Ok(false);
        };

        let expected = u64::from(document.record.fill_count);
        let options = CountOptions::builder().limit(expected.max(1)).build();
        let count = self
            .collection
            .count_documents(filter, options)
            .await
            .store_context(StoreError::Read)
            .attach_printable_lazy(|| format!("transaction hash: {transaction_hash}"))?;

        if count < expected {
            debug!(
                transaction_hash,
                stored = count,
                expected,
                "settlement partially stored"
            );
        }

        Ok(count >= expected)
    }

    async fn upsert(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let document = TradeDocument {
            id: record.key(),
            record: record.clone(),
        };
        let options = ReplaceOptions::builder().upsert(true).build();

        self.collection
            .replace_one(doc! { "_id": &document.id }, &document, options)
            .await
            .store_context(StoreError::Write)
            .attach_printable_lazy(|| format!("key: {}", document.id))?;

        Ok(())
    }

    async fn delete_before_block(&self, block_number: u64) -> Result<u64, StoreError> {
        let block_number = i64::try_from(block_number)
            .change_context(StoreError::Configuration)
            .attach_printable("block number too large")?;

        let result = self
            .collection
            .delete_many(doc! { "blockNumber": { "$lt": block_number } }, None)
            .await
            .store_context(StoreError::Write)
            .attach_printable_lazy(|| format!("before block: {block_number}"))?;

        Ok(result.deleted_count)
    }
}

impl<T> MongoResultExt<T> for std::result::Result<T, mongodb::error::Error> {
    fn store_context(self, fallback: StoreError) -> Result<T, StoreError> {
        self.map_err(|err| {
            let context = classify_error(&err, fallback);
            Report::new(err).change_context(context)
        })
    }
}

fn classify_error(err: &mongodb::error::Error, fallback: StoreError) -> StoreError {
    if err.contains_label(RETRYABLE_WRITE_ERROR) || err.contains_label(TRANSIENT_TRANSACTION_ERROR)
    {
        return StoreError::Busy;
    }

    match err.kind.as_ref() {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => StoreError::Unavailable,
        ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => {
            StoreError::Serialization
        }
        _ => fallback,
    }
}
