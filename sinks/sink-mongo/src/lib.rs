mod configuration;
mod store;

pub use self::configuration::{MongoArgs, MongoStoreOptions};
pub use self::store::{MongoStore, MongoTradeStore, TradeDocument};
