pub mod cli;
pub mod provider;
pub mod runner;
pub mod settlement_api;

pub use self::provider::{JsonRpcProvider, JsonRpcProviderOptions};
pub use self::settlement_api::SettlementApiClient;
