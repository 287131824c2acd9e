//! Client for the settlement API.
use std::time::Duration;

use alloy_primitives::B256;
use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use tradesync_common::order::{OrderFill, OrderSource, OrderSourceError, SettlementOrders};
use url::Url;

#[derive(Debug, Clone)]
pub struct SettlementApiClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl SettlementApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, OrderSourceError> {
        let client = Client::builder()
            .build()
            .change_context(OrderSourceError::Configuration)
            .attach_printable("failed to build http client")?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the url of the orders settled by `tx_hash`.
    pub fn orders_url(&self, tx_hash: B256) -> String {
        format!(
            "{}/transactions/{:#x}/orders",
            self.base_url.as_str().trim_end_matches('/'),
            tx_hash
        )
    }
}

#[async_trait]
impl OrderSource for SettlementApiClient {
    #[tracing::instrument(level = "debug", skip(self, tx_hash), fields(tx_hash = %tx_hash))]
    async fn fetch_order_fills(
        &self,
        tx_hash: B256,
    ) -> Result<SettlementOrders, OrderSourceError> {
        let url = self.orders_url(tx_hash);

        let response = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Err(err)
                    .change_context(OrderSourceError::Timeout)
                    .attach_printable_lazy(|| format!("url: {url}"));
            }
            Err(err) => {
                return Err(err)
                    .change_context(OrderSourceError::Request)
                    .attach_printable_lazy(|| format!("url: {url}"));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url = %url, "transaction unknown to the settlement api");
            return Ok(SettlementOrders::default());
        }

        if !status.is_success() {
            return Err(OrderSourceError::Status(status.as_u16()))
                .attach_printable_lazy(|| format!("url: {url}"));
        }

        let body = response
            .text()
            .await
            .change_context(OrderSourceError::Request)
            .attach_printable_lazy(|| format!("url: {url}"))?;

        Ok(parse_order_fills(&body, &url))
    }
}

/// Decode the orders in `body`.
///
/// Bodies that are not a json array have no orders. Elements that don't
/// decode are left out of the fills but still count in the total, and the
/// other fills keep their position in the array.
pub fn parse_order_fills(body: &str, url: &str) -> SettlementOrders {
    let elements = match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(elements)) => elements,
        Ok(_) => {
            warn!(url = %url, "settlement api response is not an array");
            return SettlementOrders::default();
        }
        Err(err) => {
            warn!(url = %url, error = %err, "settlement api response is not json");
            return SettlementOrders::default();
        }
    };

    let total = elements.len() as u32;
    let fills = (0..total)
        .zip(elements)
        .filter_map(
            |(index, element)| match serde_json::from_value::<OrderFill>(element) {
                Ok(fill) => Some((index, fill)),
                Err(err) => {
                    warn!(url = %url, index, error = %err, "malformed order");
                    None
                }
            },
        )
        .collect();

    SettlementOrders { fills, total }
}
