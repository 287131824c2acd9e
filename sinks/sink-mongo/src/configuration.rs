use clap::Args;
use error_stack::Result;
use tradesync_common::{store::StoreError, SyncError, SyncErrorResultExt};

#[derive(Debug, Clone, Args)]
pub struct MongoArgs {
    /// The connection string to the MongoDB database.
    #[arg(long = "mongo.connection-string", env = "MONGO_CONNECTION_STRING")]
    pub mongo_connection_string: String,
    /// The database to use.
    #[arg(
        long = "mongo.database",
        env = "MONGO_DATABASE",
        default_value = "tradesync"
    )]
    pub mongo_database: String,
    /// Trades are stored in one collection for each network, named
    /// `{prefix}_{network}`.
    #[arg(
        long = "mongo.collection-prefix",
        env = "MONGO_COLLECTION_PREFIX",
        default_value = "trades"
    )]
    pub mongo_collection_prefix: String,
}

#[derive(Debug, Clone)]
pub struct MongoStoreOptions {
    pub connection_string: String,
    pub database: String,
    pub collection_prefix: String,
}

impl MongoArgs {
    pub fn to_mongo_store_options(&self) -> Result<MongoStoreOptions, SyncError> {
        if self.mongo_database.trim().is_empty() {
            return Err(StoreError::Configuration).configuration("empty mongo database name");
        }

        if self.mongo_collection_prefix.trim().is_empty() {
            return Err(StoreError::Configuration).configuration("empty mongo collection prefix");
        }

        Ok(MongoStoreOptions {
            connection_string: self.mongo_connection_string.clone(),
            database: self.mongo_database.clone(),
            collection_prefix: self.mongo_collection_prefix.clone(),
        })
    }
}
