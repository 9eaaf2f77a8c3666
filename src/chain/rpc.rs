//! JSON-RPC implementation of [`ChainDataPort`].
//!
//! - Reads: one JSON-RPC batch of `eth_call`s, matched back to calls by id
//! - Writes: `eth_sendTransaction` from the connected account (the node or
//!   wallet signs), then `eth_getTransactionReceipt` polling until the
//!   transaction confirms, reverts or the confirmation timeout elapses

use alloy::primitives::{hex, Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ChainDataPort, ReadCall, ReadResult, TxReceipt, WriteCall};
use crate::{
    config::{ContractsConfig, CoordinatorConfig},
    logging::targets,
    prelude::*,
    req::HttpClient,
    serde_utils::deserialize_opt_hex,
    Error, ReadFailure, TransactionFailure,
};

/// EIP-1193 "user rejected request".
const USER_REJECTED_CODE: i64 = 4001;

/// Geth/Erigon code for `execution reverted`.
const EXECUTION_REVERTED_CODE: i64 = 3;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

impl<'a> RpcRequest<'a> {
    fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl RpcErrorObject {
    fn into_read_failure(self) -> ReadFailure {
        if self.code == EXECUTION_REVERTED_CODE || self.message.contains("revert") {
            ReadFailure::Reverted(self.message)
        } else {
            ReadFailure::Transport(format!("rpc error {}: {}", self.code, self.message))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    #[serde(default, deserialize_with = "deserialize_opt_hex")]
    status: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_hex")]
    block_number: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_hex")]
    gas_used: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct JsonRpcChainPort {
    http_client: HttpClient,
    contracts: ContractsConfig,
    /// Account transactions are sent from
    from: Option<Address>,
    confirmation_timeout: Duration,
    receipt_poll_interval: Duration,
}

impl JsonRpcChainPort {
    pub fn new(http_client: HttpClient, contracts: ContractsConfig) -> Self {
        let defaults = CoordinatorConfig::default();
        Self {
            http_client,
            contracts,
            from: None,
            confirmation_timeout: defaults.confirmation_timeout(),
            receipt_poll_interval: defaults.receipt_poll_interval(),
        }
    }

    /// Enable writes from `account`.
    pub fn with_sender(mut self, account: Address) -> Self {
        self.from = Some(account);
        self
    }

    pub fn with_confirmation(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self.receipt_poll_interval = poll_interval;
        self
    }

    fn eth_call_params(&self, call: &ReadCall) -> Value {
        json!([
            {
                "to": call.target(&self.contracts),
                "data": hex::encode_prefixed(call.calldata()),
            },
            "latest"
        ])
    }

    /// Single JSON-RPC request returning the raw `result` value.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let response: RpcResponse = self
            .http_client
            .post_json(&RpcRequest::new(1, method, params))
            .await?;
        if let Some(err) = response.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn send_transaction(
        &self,
        call: &WriteCall,
    ) -> std::result::Result<B256, TransactionFailure> {
        let from = self.from.ok_or_else(|| {
            TransactionFailure::Submission("no sender account configured".to_string())
        })?;
        let params = json!([{
            "from": from,
            "to": call.target(&self.contracts),
            "data": hex::encode_prefixed(call.calldata()),
        }]);

        let result = match self.request("eth_sendTransaction", params).await {
            Ok(result) => result,
            Err(Error::Rpc { code, message }) if code == USER_REJECTED_CODE => {
                return Err(TransactionFailure::Rejected(message));
            }
            Err(e) => return Err(TransactionFailure::Submission(e.to_string())),
        };

        let hash = result
            .as_str()
            .ok_or_else(|| TransactionFailure::Submission(format!("unexpected result {result}")))?;
        B256::from_str(hash)
            .map_err(|e| TransactionFailure::Submission(format!("bad tx hash {hash}: {e}")))
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
    ) -> std::result::Result<TxReceipt, TransactionFailure> {
        let started = Instant::now();
        loop {
            match self
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await
            {
                Ok(Value::Null) => {}
                Ok(raw) => {
                    let receipt: RpcReceipt = serde_json::from_value(raw).map_err(|e| {
                        TransactionFailure::Submission(format!("unreadable receipt: {e}"))
                    })?;
                    if receipt.status == Some(0) {
                        return Err(TransactionFailure::Reverted { tx_hash });
                    }
                    return Ok(TxReceipt {
                        tx_hash,
                        block_number: receipt.block_number,
                        gas_used: receipt.gas_used,
                    });
                }
                Err(e) => {
                    debug!(target: targets::RPC, tx = %tx_hash, error = %e, "Receipt poll failed");
                }
            }

            let waited = started.elapsed();
            if waited >= self.confirmation_timeout {
                return Err(TransactionFailure::TimedOut {
                    tx_hash,
                    waited_ms: waited.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

#[async_trait]
impl ChainDataPort for JsonRpcChainPort {
    async fn read(&self, calls: &[ReadCall]) -> Vec<ReadResult> {
        if calls.is_empty() {
            return Vec::new();
        }

        let batch: Vec<RpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(id, call)| RpcRequest::new(id as u64, "eth_call", self.eth_call_params(call)))
            .collect();

        let responses: Vec<RpcResponse> = match self.http_client.post_json(&batch).await {
            Ok(responses) => responses,
            Err(e) => {
                warn!(
                    target: targets::RPC,
                    calls = calls.len(),
                    error = %e,
                    "Batch read failed"
                );
                return vec![Err(ReadFailure::Transport(e.to_string())); calls.len()];
            }
        };

        let mut by_id: HashMap<u64, RpcResponse> = responses
            .into_iter()
            .filter_map(|r| r.id.map(|id| (id, r)))
            .collect();

        calls
            .iter()
            .enumerate()
            .map(|(id, call)| {
                let response = by_id.remove(&(id as u64)).ok_or(ReadFailure::Missing)?;
                if let Some(err) = response.error {
                    return Err(err.into_read_failure());
                }
                let raw = response
                    .result
                    .as_ref()
                    .and_then(Value::as_str)
                    .ok_or(ReadFailure::Missing)?;
                let data = hex::decode(raw).map_err(|e| ReadFailure::Decode(e.to_string()))?;
                call.decode(&data)
            })
            .collect()
    }

    async fn write(&self, call: WriteCall) -> std::result::Result<TxReceipt, TransactionFailure> {
        let tx_hash = self.send_transaction(&call).await?;
        info!(target: targets::RPC, action = call.label(), tx = %tx_hash, "Transaction submitted");
        let receipt = self.wait_for_receipt(tx_hash).await?;
        info!(
            target: targets::RPC,
            action = call.label(),
            tx = %tx_hash,
            block = ?receipt.block_number,
            "Transaction confirmed"
        );
        Ok(receipt)
    }
}
