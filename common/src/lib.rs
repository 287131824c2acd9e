pub mod backoff;
pub mod chain;
pub mod cli;
pub mod error;
pub mod historical;
pub mod log_scan;
pub mod network;
pub mod orchestrator;
pub mod order;
pub mod pipeline;
pub mod progress;
pub mod realtime;
pub mod settlement;
pub mod store;
pub mod trade;

#[cfg(test)]
mod testing;

pub use self::backoff::{Backoff, BackoffOptions, RetryHint, Retryable};
pub use self::error::{ReportExt, SyncError, SyncErrorResultExt};
pub use self::network::NetworkConfig;
