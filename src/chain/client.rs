//!
//! JSON-RPC client for the chain node.
//!
//! This module provides an async client for the Ethereum-style JSON-RPC API exposed by the
//! node, and the `LedgerClient` trait the transaction engine is written against. All methods
//! are async and designed for use with Tokio.

use super::types::*;
use crate::utils::{encode_bytes, parse_u64_quantity, to_quantity};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// The remote ledger operations the transaction engine needs.
#[async_trait]
pub trait LedgerClient: Send + Sync {
	/// Executes a read-only call and returns the raw return data.
	async fn call(
		&self,
		from: &Account,
		call: &MethodCall,
		settings: &CallSettings,
	) -> Result<Vec<u8>, ChainError>;

	/// Sends a transaction from an account unlocked on the node.
	async fn send_transaction(
		&self,
		from: &Account,
		call: &MethodCall,
		settings: &CallSettings,
	) -> Result<TxHash, ChainError>;

	async fn estimate_gas(
		&self,
		from: &Account,
		call: &MethodCall,
		settings: &CallSettings,
	) -> Result<u64, ChainError>;

	/// Submits an already signed transaction.
	async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, ChainError>;

	/// Looks up a receipt. `Ok(None)` means "not mined yet", which is not an error.
	async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>, ChainError>;

	/// Past logs matching `filter`.
	async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, ChainError>;
}

/// JSON-RPC node client
#[derive(Clone)]
pub struct JsonRpcClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// The node's JSON-RPC HTTP endpoint.
	rpc_url: String,
	next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
	/// Create a new node client.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP endpoint for JSON-RPC requests.
	/// * `timeout` - Per-request timeout; the node gives no other bound on slow range queries.
	pub fn new(rpc_url: String, timeout: Duration) -> Result<Self, ChainError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			next_id: Arc::new(AtomicU64::new(1)),
		})
	}

	pub fn rpc_url(&self) -> &str {
		&self.rpc_url
	}

	/// Execute a JSON-RPC request.
	///
	/// # Returns
	/// The decoded `result` member, or a `ChainError` if the transport fails or the node
	/// answers with an `error` member.
	pub async fn request<T: DeserializeOwned>(
		&self,
		method: &str,
		params: Value,
	) -> Result<T, ChainError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});

		debug!("RPC request {} #{}", method, id);

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(ChainError::InvalidResponse(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let response_json: Value = response.json().await?;

		if let Some(error) = response_json.get("error") {
			return Err(ChainError::Rpc {
				code: error.get("code").and_then(|c| c.as_i64()).unwrap_or_default(),
				message: error
					.get("message")
					.and_then(|m| m.as_str())
					.unwrap_or("Unknown RPC error")
					.to_string(),
			});
		}

		let result = response_json
			.get("result")
			.cloned()
			.ok_or_else(|| ChainError::InvalidResponse(format!("{} returned no result", method)))?;

		Ok(serde_json::from_value(result)?)
	}

	pub async fn block_number(&self) -> Result<u64, ChainError> {
		let quantity: String = self.request("eth_blockNumber", json!([])).await?;
		Ok(parse_u64_quantity(&quantity)?)
	}

	fn transaction_object(from: &Account, call: &MethodCall, settings: &CallSettings) -> Value {
		let mut tx = json!({
			"from": from.as_str(),
			"data": encode_bytes(&call.data),
		});
		if let Some(to) = &call.to {
			tx["to"] = json!(to);
		}
		if let Some(gas) = settings.gas {
			tx["gas"] = json!(to_quantity(gas.into()));
		}
		if let Some(gas_price) = settings.gas_price {
			tx["gasPrice"] = json!(to_quantity(gas_price));
		}
		if let Some(value) = settings.value {
			tx["value"] = json!(to_quantity(value));
		}
		if let Some(nonce) = settings.nonce {
			tx["nonce"] = json!(to_quantity(nonce.into()));
		}
		tx
	}
}

#[async_trait]
impl LedgerClient for JsonRpcClient {
	async fn call(
		&self,
		from: &Account,
		call: &MethodCall,
		settings: &CallSettings,
	) -> Result<Vec<u8>, ChainError> {
		let tx = Self::transaction_object(from, call, settings);
		let data: String = self.request("eth_call", json!([tx, "latest"])).await?;
		Ok(crate::utils::decode_bytes(&data)?)
	}

	async fn send_transaction(
		&self,
		from: &Account,
		call: &MethodCall,
		settings: &CallSettings,
	) -> Result<TxHash, ChainError> {
		let tx = Self::transaction_object(from, call, settings);
		self.request("eth_sendTransaction", json!([tx])).await
	}

	async fn estimate_gas(
		&self,
		from: &Account,
		call: &MethodCall,
		settings: &CallSettings,
	) -> Result<u64, ChainError> {
		let tx = Self::transaction_object(from, call, settings);
		let quantity: String = self.request("eth_estimateGas", json!([tx])).await?;
		Ok(parse_u64_quantity(&quantity)?)
	}

	async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, ChainError> {
		self.request("eth_sendRawTransaction", json!([encode_bytes(raw)]))
			.await
	}

	async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>, ChainError> {
		let receipt: Option<RpcReceipt> = self
			.request("eth_getTransactionReceipt", json!([hash.0]))
			.await?;
		match receipt {
			Some(receipt) => receipt.into_receipt(),
			None => Ok(None),
		}
	}

	async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, ChainError> {
		self.request("eth_getLogs", json!([filter])).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_call() -> MethodCall {
		MethodCall {
			contract: "ZkAsset".to_string(),
			method: "confidentialTransfer".to_string(),
			to: Some("0x00000000000000000000000000000000000000aa".to_string()),
			data: vec![0xca, 0xfe],
		}
	}

	#[test]
	fn test_transaction_object_includes_only_set_fields() {
		let from = Account::new("0x00000000000000000000000000000000000000bb");
		let tx = JsonRpcClient::transaction_object(
			&from,
			&sample_call(),
			&CallSettings::default().with_gas(6_500_000),
		);

		assert_eq!(tx["from"], "0x00000000000000000000000000000000000000bb");
		assert_eq!(tx["to"], "0x00000000000000000000000000000000000000aa");
		assert_eq!(tx["data"], "0xcafe");
		assert_eq!(tx["gas"], "0x632ea0");
		assert!(tx.get("gasPrice").is_none());
		assert!(tx.get("nonce").is_none());
	}

	#[test]
	fn test_contract_creation_has_no_recipient() {
		let creation = MethodCall {
			to: None,
			..sample_call()
		};
		let tx = JsonRpcClient::transaction_object(
			&Account::new("0x00000000000000000000000000000000000000bb"),
			&creation,
			&CallSettings::default(),
		);
		assert!(tx.get("to").is_none());
		assert_eq!(tx["data"], "0xcafe");
	}

	#[test]
	fn test_log_filter_serialization() {
		let filter = LogFilter {
			from_block: to_quantity(1),
			to_block: to_quantity(100),
			address: "0x01".to_string(),
			topics: vec![Some(vec!["0xaa".to_string(), "0xbb".to_string()]), None],
		};
		let value = serde_json::to_value(&filter).unwrap();
		assert_eq!(value["fromBlock"], "0x1");
		assert_eq!(value["toBlock"], "0x64");
		assert_eq!(value["topics"][1], Value::Null);
	}
}
