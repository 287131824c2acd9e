mod http;
pub mod models;

pub use self::http::{settlement_topic, JsonRpcProvider, JsonRpcProviderOptions};
