use error_stack::Result;
use tradesync_common::{SyncError, SyncErrorResultExt};
use tradesync_sink_mongo::{MongoArgs, MongoStore};

pub async fn connect_store(args: &MongoArgs) -> Result<MongoStore, SyncError> {
    let options = args.to_mongo_store_options()?;
    MongoStore::connect(options)
        .await
        .initialization("failed to connect to mongo")
}
