use std::{
    fmt::Debug,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use alloy_primitives::{keccak256, Address, B256};
use async_trait::async_trait;
use error_stack::{Report, Result, ResultExt};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use tradesync_common::chain::{
    Block, BlockSource, BlockSourceError, SettlementLog, SettlementLogSource,
};
use url::Url;

use super::models;

const GET_LOGS: &str = "eth_getLogs";

/// Error messages of providers throttling requests.
const RATE_LIMITED_MESSAGES: &[&str] = &[
    "rate limit",
    "too many requests",
    "request limit",
    "throttl",
];

/// Error messages returned by providers that refuse large `eth_getLogs` ranges.
const RANGE_TOO_LARGE_MESSAGES: &[&str] = &[
    "block range",
    "range too large",
    "range is too large",
    "exceed maximum block range",
    "query returned more than",
    "too many results",
    "limit exceeded",
    "response size exceeded",
];

#[derive(Debug, Clone)]
pub struct JsonRpcProviderOptions {
    /// Request timeout.
    pub timeout: Duration,
    /// Headers to send with the requests.
    pub headers: HeaderMap<HeaderValue>,
}

/// Ethereum JSON-RPC client over HTTP.
///
/// Requests are sent once. Retries are the caller's business.
#[derive(Debug)]
pub struct JsonRpcProvider {
    client: Client,
    url: Url,
    options: JsonRpcProviderOptions,
    next_id: AtomicU64,
}

/// Topic of the `Settlement(address)` event.
pub fn settlement_topic() -> B256 {
    keccak256("Settlement(address)")
}

impl JsonRpcProvider {
    pub fn new(url: Url, options: JsonRpcProviderOptions) -> Result<Self, BlockSourceError> {
        let client = Client::builder()
            .default_headers(options.headers.clone())
            .build()
            .change_context(BlockSourceError::Configuration)
            .attach_printable("failed to build http client")?;

        Ok(Self {
            client,
            url,
            options,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn send_request<T>(&self, method: &str, params: Value) -> Result<T, BlockSourceError>
    where
        T: DeserializeOwned + Debug,
    {
        let request = models::RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = match self
            .client
            .post(self.url.clone())
            .json(&request)
            .timeout(self.options.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Err(err)
                    .change_context(BlockSourceError::Timeout)
                    .attach_printable_lazy(|| format!("method: {method}"));
            }
            Err(err) => {
                return Err(err)
                    .change_context(BlockSourceError::Request)
                    .attach_printable_lazy(|| format!("method: {method}"));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BlockSourceError::RateLimited)
                .attach_printable_lazy(|| format!("method: {method}"));
        }

        if status.is_server_error() {
            return Err(BlockSourceError::ServerError)
                .attach_printable(format!("status: {status}"))
                .attach_printable_lazy(|| format!("method: {method}"));
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BlockSourceError::Configuration)
                .attach_printable(format!("status: {status}"))
                .attach_printable("check the rpc url and headers");
        }

        if !status.is_success() {
            return Err(BlockSourceError::Rpc)
                .attach_printable(format!("status: {status}"))
                .attach_printable_lazy(|| format!("method: {method}"));
        }

        let text_response = response
            .text()
            .await
            .change_context(BlockSourceError::Request)?;

        let response: models::RpcResponse = serde_json::from_str(&text_response)
            .change_context(BlockSourceError::DeserializeResponse)
            .attach_printable_lazy(|| format!("method: {method}"))?;

        if let Some(error) = response.error {
            return Err(rpc_error(method, &error))
                .attach_printable_lazy(|| format!("method: {method}"));
        }

        serde_json::from_value(response.result)
            .change_context(BlockSourceError::DeserializeResponse)
            .attach_printable_lazy(|| format!("method: {method}"))
    }
}

#[async_trait]
impl BlockSource for JsonRpcProvider {
    async fn latest_block_number(&self) -> Result<u64, BlockSourceError> {
        let number: alloy_primitives::U64 = self.send_request("eth_blockNumber", json!([])).await?;
        Ok(number.to::<u64>())
    }

    async fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> Result<Block, BlockSourceError> {
        let block: Option<models::RpcBlock> = self
            .send_request(
                "eth_getBlockByNumber",
                json!([models::quantity(number), include_transactions]),
            )
            .await
            .attach_printable_lazy(|| format!("block number: {number}"))?;

        let block = block
            .ok_or(BlockSourceError::NotFound)
            .attach_printable_lazy(|| format!("block number: {number}"))?;

        debug!(block = number, "block received");
        Ok(block.into())
    }
}

#[async_trait]
impl SettlementLogSource for JsonRpcProvider {
    async fn get_settlement_logs(
        &self,
        from: u64,
        to: u64,
        contract: Address,
    ) -> Result<Vec<SettlementLog>, BlockSourceError> {
        let filter = models::LogFilter {
            from_block: models::quantity(from),
            to_block: models::quantity(to),
            address: contract,
            topics: vec![settlement_topic()],
        };

        let logs: Vec<models::RpcLog> = self
            .send_request(GET_LOGS, json!([filter]))
            .await
            .attach_printable_lazy(|| format!("blocks: {from}-{to}"))?;

        Ok(logs
            .into_iter()
            .filter_map(models::RpcLog::into_settlement_log)
            .collect())
    }
}

/// Classify a json-rpc error of `method`.
///
/// Throttling takes precedence over everything else. Range errors are only
/// recognized for `eth_getLogs`, other methods leave them to the retry
/// heuristic.
fn rpc_error(method: &str, error: &models::RpcError) -> Report<BlockSourceError> {
    let message = error.message.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|pattern| message.contains(pattern));

    let context = if matches(RATE_LIMITED_MESSAGES) {
        BlockSourceError::RateLimited
    } else if method == GET_LOGS && matches(RANGE_TOO_LARGE_MESSAGES) {
        BlockSourceError::RangeTooLarge
    } else {
        BlockSourceError::Rpc
    };

    Report::new(context).attach_printable(format!(
        "json-rpc error {}: {}",
        error.code, error.message
    ))
}

impl Default for JsonRpcProviderOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            headers: HeaderMap::default(),
        }
    }
}
