//! Order fills returned by the settlement API.
use std::{fmt, sync::Arc};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use error_stack::Result;
use serde::{Deserialize, Serialize};

use crate::backoff::{RetryHint, Retryable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Buy,
    Sell,
}

/// An order settled by a settlement transaction.
///
/// Amounts are kept as the decimal strings sent by the API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub owner: Option<Address>,
    pub sell_token: Address,
    pub buy_token: Address,
    pub sell_amount: String,
    pub buy_amount: String,
    pub executed_sell_amount: String,
    pub executed_sell_amount_before_fees: String,
    pub executed_buy_amount: String,
    #[serde(default)]
    pub receiver: Option<Address>,
    pub kind: OrderKind,
    #[serde(default)]
    pub creation_date: Option<String>,
}

/// The orders of one settlement transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementOrders {
    /// The fills that decoded, with their position in the API response.
    pub fills: Vec<(u32, OrderFill)>,
    /// Number of orders in the API response, including malformed ones.
    pub total: u32,
}

impl SettlementOrders {
    /// Orders whose position in the response is their index in `fills`.
    pub fn new(fills: Vec<OrderFill>) -> Self {
        let total = fills.len() as u32;
        let fills = (0..total).zip(fills).collect();
        Self { fills, total }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of orders in the response that didn't decode.
    pub fn malformed(&self) -> u32 {
        self.total.saturating_sub(self.fills.len() as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderSourceError {
    /// The request could not be sent.
    Request,
    /// The request timed out.
    Timeout,
    /// The API returned an unexpected status code.
    Status(u16),
    /// The response couldn't be decoded.
    DeserializeResponse,
    /// The client is misconfigured.
    Configuration,
}

/// Fetch the orders settled by a transaction.
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Returns the order fills settled by the transaction.
    ///
    /// A transaction unknown to the API has no fills. This is not an error.
    async fn fetch_order_fills(&self, tx_hash: B256)
        -> Result<SettlementOrders, OrderSourceError>;
}

#[async_trait]
impl<T> OrderSource for Arc<T>
where
    T: OrderSource + ?Sized,
{
    async fn fetch_order_fills(
        &self,
        tx_hash: B256,
    ) -> Result<SettlementOrders, OrderSourceError> {
        self.as_ref().fetch_order_fills(tx_hash).await
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Buy => f.write_str("buy"),
            OrderKind::Sell => f.write_str("sell"),
        }
    }
}

impl error_stack::Context for OrderSourceError {}

impl fmt::Display for OrderSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSourceError::Request => write!(f, "failed to send request"),
            OrderSourceError::Timeout => write!(f, "request timed out"),
            OrderSourceError::Status(status) => write!(f, "unexpected status code {status}"),
            OrderSourceError::DeserializeResponse => write!(f, "failed to deserialize response"),
            OrderSourceError::Configuration => write!(f, "configuration error"),
        }
    }
}

impl Retryable for OrderSourceError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            OrderSourceError::Request | OrderSourceError::Timeout => RetryHint::Retryable,
            OrderSourceError::Status(status) if *status == 429 || *status >= 500 => {
                RetryHint::Retryable
            }
            OrderSourceError::Status(_) => RetryHint::Unknown,
            OrderSourceError::DeserializeResponse | OrderSourceError::Configuration => {
                RetryHint::Fatal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{OrderFill, OrderKind, SettlementOrders};

    #[test]
    fn test_deserialize_order_fill() {
        let value = json!({
            "uid": "0x01",
            "owner": "0x1111111111111111111111111111111111111111",
            "creationDate": "2024-01-01T00:00:00.000Z",
            "sellToken": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            "buyToken": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "receiver": null,
            "sellAmount": "1000000000000000000",
            "buyAmount": "2000000000",
            "executedSellAmount": "1000000000000000000",
            "executedSellAmountBeforeFees": "999000000000000000",
            "executedBuyAmount": "2001000000",
            "kind": "sell",
            "class": "market",
            "status": "fulfilled"
        });

        let fill: OrderFill = serde_json::from_value(value).unwrap();
        assert_eq!(fill.kind, OrderKind::Sell);
        assert_eq!(fill.receiver, None);
        assert_eq!(fill.executed_buy_amount, "2001000000");
        assert_eq!(fill.uid.as_deref(), Some("0x01"));
    }

    #[test]
    fn test_deserialize_minimal_order_fill() {
        let value = json!({
            "sellToken": "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
            "buyToken": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "receiver": "0x2222222222222222222222222222222222222222",
            "sellAmount": "1",
            "buyAmount": "2",
            "executedSellAmount": "1",
            "executedSellAmountBeforeFees": "1",
            "executedBuyAmount": "2",
            "kind": "buy"
        });

        let fill: OrderFill = serde_json::from_value(value).unwrap();
        assert_eq!(fill.kind, OrderKind::Buy);
        assert!(fill.receiver.is_some());
        assert!(fill.creation_date.is_none());
    }

    #[test]
    fn test_settlement_orders_positions() {
        let orders = SettlementOrders::default();
        assert!(orders.is_empty());
        assert_eq!(orders.malformed(), 0);

        let fill: OrderFill = serde_json::from_value(json!({
            "sellToken": "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
            "buyToken": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "sellAmount": "1",
            "buyAmount": "2",
            "executedSellAmount": "1",
            "executedSellAmountBeforeFees": "1",
            "executedBuyAmount": "2",
            "kind": "sell"
        }))
        .unwrap();
        let orders = SettlementOrders::new(vec![fill.clone(), fill]);
        assert_eq!(orders.total, 2);
        assert_eq!(orders.malformed(), 0);
        assert_eq!(
            orders.fills.iter().map(|(index, _)| *index).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }
}
