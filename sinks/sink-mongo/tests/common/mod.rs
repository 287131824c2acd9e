use testcontainers::{core::WaitFor, images::generic::GenericImage};
use tradesync_common::{order::OrderKind, trade::TradeRecord};
use tradesync_sink_mongo::MongoStoreOptions;

pub fn new_mongo_image() -> GenericImage {
    GenericImage::new("mongo", "7.0.1")
        .with_wait_for(WaitFor::message_on_stdout("Waiting for connections"))
}

pub fn new_store_options(port: u16) -> MongoStoreOptions {
    MongoStoreOptions {
        connection_string: format!("mongodb://localhost:{}", port),
        database: "test".into(),
        collection_prefix: "trades".into(),
    }
}

pub fn new_record(network: &str, block_number: u64, tx: u8, fill_index: u32) -> TradeRecord {
    TradeRecord {
        transaction_hash: format!("0x{}", format!("{:02x}", tx).repeat(32)),
        fill_index,
        fill_count: 1,
        block_number,
        chain_id: 1,
        network: network.to_string(),
        order_uid: None,
        owner: None,
        sell_token: format!("0x{}", "11".repeat(20)),
        buy_token: format!("0x{}", "22".repeat(20)),
        sell_amount: "1000000000000000000".to_string(),
        buy_amount: "2000000000".to_string(),
        executed_sell_amount: "1000000000000000000".to_string(),
        executed_sell_amount_before_fees: "999000000000000000".to_string(),
        executed_buy_amount: "2001000000".to_string(),
        kind: OrderKind::Sell,
        receiver: None,
        creation_date: None,
    }
}
