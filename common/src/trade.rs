//! The trade records persisted by the sync.
use std::fmt;

use alloy_primitives::{Address, U256};
use error_stack::{Result, ResultExt};
use serde::{Deserialize, Serialize};

use crate::{
    network::NetworkConfig,
    order::{OrderFill, OrderKind},
    settlement::SettlementTransaction,
};

/// One order fill of a settlement transaction.
///
/// Records are identified by [TradeRecord::key], which combines the
/// transaction hash with the position of the fill in the settlement.
/// `fill_count` is the number of orders of the settlement, so that a
/// settlement is only considered stored once all its fills are.
/// Amounts are decimal strings of 256 bits unsigned integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub transaction_hash: String,
    pub fill_index: u32,
    #[serde(default)]
    pub fill_count: u32,
    pub block_number: u64,
    pub chain_id: u64,
    pub network: String,
    pub order_uid: Option<String>,
    pub owner: Option<String>,
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: String,
    pub buy_amount: String,
    pub executed_sell_amount: String,
    pub executed_sell_amount_before_fees: String,
    pub executed_buy_amount: String,
    pub kind: OrderKind,
    pub receiver: Option<String>,
    pub creation_date: Option<String>,
}

#[derive(Debug)]
pub struct InvalidFillError;
impl error_stack::Context for InvalidFillError {}

impl fmt::Display for InvalidFillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid order fill")
    }
}

impl TradeRecord {
    /// Build the record for fill number `fill_index` of the `fill_count`
    /// fills of `settlement`.
    pub fn from_fill(
        network: &NetworkConfig,
        settlement: &SettlementTransaction,
        fill_index: u32,
        fill_count: u32,
        fill: &OrderFill,
    ) -> Result<Self, InvalidFillError> {
        Ok(TradeRecord {
            transaction_hash: format!("{:#x}", settlement.hash),
            fill_index,
            fill_count,
            block_number: settlement.block_number,
            chain_id: network.chain_id,
            network: network.name.clone(),
            order_uid: fill.uid.as_ref().map(|uid| uid.to_lowercase()),
            owner: fill.owner.as_ref().map(address_to_string),
            sell_token: address_to_string(&fill.sell_token),
            buy_token: address_to_string(&fill.buy_token),
            sell_amount: normalize_amount("sellAmount", &fill.sell_amount)?,
            buy_amount: normalize_amount("buyAmount", &fill.buy_amount)?,
            executed_sell_amount: normalize_amount(
                "executedSellAmount",
                &fill.executed_sell_amount,
            )?,
            executed_sell_amount_before_fees: normalize_amount(
                "executedSellAmountBeforeFees",
                &fill.executed_sell_amount_before_fees,
            )?,
            executed_buy_amount: normalize_amount(
                "executedBuyAmount",
                &fill.executed_buy_amount,
            )?,
            kind: fill.kind,
            receiver: fill.receiver.as_ref().map(address_to_string),
            creation_date: fill.creation_date.clone(),
        })
    }

    /// The unique key of the record in its network collection.
    pub fn key(&self) -> String {
        record_key(&self.transaction_hash, self.fill_index)
    }
}

/// Returns the key of fill `fill_index` of transaction `transaction_hash`.
pub fn record_key(transaction_hash: &str, fill_index: u32) -> String {
    format!("{}:{}", transaction_hash.to_lowercase(), fill_index)
}

fn address_to_string(address: &Address) -> String {
    format!("{:#x}", address)
}

/// Parse the amount as an unsigned 256 bits integer and print it back in decimal.
fn normalize_amount(field: &'static str, amount: &str) -> Result<String, InvalidFillError> {
    let value = amount
        .trim()
        .parse::<U256>()
        .change_context(InvalidFillError)
        .attach_printable_lazy(|| format!("{field} is not a valid amount: {amount}"))?;
    Ok(value.to_string())
}
