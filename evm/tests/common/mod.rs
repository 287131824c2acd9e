#![allow(dead_code)]

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tradesync_evm::{JsonRpcProvider, JsonRpcProviderOptions};
use wiremock::{http::Method, Match, MockServer, Request, Respond, ResponseTemplate};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    params: Value,
}

/// Match a JSON-RPC request by method, and by params if given.
pub struct RpcRequestMatcher {
    method: String,
    params: Option<Value>,
}

pub struct RpcResponse {
    result: Value,
}

pub struct RpcErrorResponse {
    code: i64,
    message: String,
}

pub fn rpc_request<P>(method: impl Into<String>, params: P) -> RpcRequestMatcher
where
    P: serde::Serialize,
{
    RpcRequestMatcher {
        method: method.into(),
        params: Some(serde_json::to_value(params).expect("failed to serialize JSON params")),
    }
}

pub fn rpc_method(method: impl Into<String>) -> RpcRequestMatcher {
    RpcRequestMatcher {
        method: method.into(),
        params: None,
    }
}

pub fn new_provider(server: &MockServer) -> JsonRpcProvider {
    let options = JsonRpcProviderOptions {
        timeout: Duration::from_secs(2),
        ..JsonRpcProviderOptions::default()
    };
    JsonRpcProvider::new(server.uri().parse().unwrap(), options).unwrap()
}

pub fn hash(byte: u8) -> String {
    format!("0x{}", format!("{:02x}", byte).repeat(32))
}

pub fn rpc_block(number: u64, transactions: Value) -> Value {
    json!({
        "number": format!("{:#x}", number),
        "hash": hash(0xaa),
        "parentHash": hash(0xbb),
        "timestamp": "0x65a8e4d0",
        "transactions": transactions,
    })
}

impl RpcResponse {
    pub fn new(result: Value) -> Self {
        Self { result }
    }
}

impl RpcErrorResponse {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Match for RpcRequestMatcher {
    fn matches(&self, req: &Request) -> bool {
        if req.method != Method::Post {
            return false;
        }

        if let Ok(rpc_req) = serde_json::from_slice::<RpcRequest>(&req.body) {
            rpc_req.method == self.method
                && self
                    .params
                    .as_ref()
                    .map(|params| rpc_req.params == *params)
                    .unwrap_or(true)
        } else {
            false
        }
    }
}

impl Respond for RpcResponse {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        if let Ok(rpc_req) = serde_json::from_slice::<RpcRequest>(&req.body) {
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": rpc_req.id,
                "result": self.result,
            }))
        } else {
            ResponseTemplate::new(400)
        }
    }
}

impl Respond for RpcErrorResponse {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        if let Ok(rpc_req) = serde_json::from_slice::<RpcRequest>(&req.body) {
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": rpc_req.id,
                "error": {
                    "code": self.code,
                    "message": self.message,
                }
            }))
        } else {
            ResponseTemplate::new(400)
        }
    }
}
