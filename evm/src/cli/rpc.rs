use std::time::Duration;

use clap::Args;
use error_stack::{Result, ResultExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tradesync_common::SyncError;

use crate::{provider::JsonRpcProviderOptions, runner::ClientOptions};

#[derive(Args, Clone, Debug)]
pub struct RpcArgs {
    /// JSON-RPC request timeout.
    #[arg(
        long = "rpc.timeout-sec",
        env = "TRADESYNC_RPC_TIMEOUT_SEC",
        default_value = "20"
    )]
    pub rpc_timeout_sec: u64,

    /// Headers to send with the JSON-RPC requests, as `name:value`.
    #[arg(long = "rpc.headers", env = "TRADESYNC_RPC_HEADERS", value_delimiter = ',')]
    pub rpc_headers: Vec<String>,

    /// Settlement API request timeout.
    #[arg(
        long = "api.timeout-sec",
        env = "TRADESYNC_API_TIMEOUT_SEC",
        default_value = "20"
    )]
    pub api_timeout_sec: u64,
}

impl RpcArgs {
    pub fn to_client_options(&self) -> Result<ClientOptions, SyncError> {
        if self.rpc_timeout_sec == 0 || self.api_timeout_sec == 0 {
            return Err(SyncError::Configuration)
                .attach_printable("request timeouts must be greater than zero");
        }

        let headers = {
            let mut headers = HeaderMap::default();

            for kv in self.rpc_headers.iter() {
                let (key, value) = kv
                    .split_once(':')
                    .ok_or(SyncError::Configuration)
                    .attach_printable("invalid header")
                    .attach_printable_lazy(|| format!("header: {}", kv))?;

                headers.insert(
                    key.trim()
                        .parse::<HeaderName>()
                        .change_context(SyncError::Configuration)
                        .attach_printable("invalid header name")
                        .attach_printable_lazy(|| format!("header name: {}", key))?,
                    value
                        .trim()
                        .parse::<HeaderValue>()
                        .change_context(SyncError::Configuration)
                        .attach_printable("invalid header value")
                        .attach_printable_lazy(|| format!("header value: {}", value))?,
                );
            }

            headers
        };

        Ok(ClientOptions {
            rpc: JsonRpcProviderOptions {
                timeout: Duration::from_secs(self.rpc_timeout_sec),
                headers,
            },
            api_timeout: Duration::from_secs(self.api_timeout_sec),
        })
    }
}
