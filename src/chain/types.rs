//! Types for the JSON-RPC node surface: accounts, hashes, receipts, logs and errors.

use crate::utils::{HexValueError, parse_u64_quantity};

use serde::{Deserialize, Serialize};
use std::fmt;

/// An externally owned account address, stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Account(String);

impl Account {
	pub fn new(address: impl AsRef<str>) -> Self {
		Self(address.as_ref().trim().to_ascii_lowercase())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// The account left-padded to a 32-byte log topic, as indexed event arguments are.
	pub fn as_topic(&self) -> String {
		let bare = self.0.strip_prefix("0x").unwrap_or(&self.0);
		format!("0x{:0>64}", bare)
	}
}

impl From<String> for Account {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

impl From<&str> for Account {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl From<Account> for String {
	fn from(value: Account) -> Self {
		value.0
	}
}

impl fmt::Display for Account {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Hash returned by the node when it accepts a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Inclusive range of blocks requested from the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
	pub from: u64,
	pub to: u64,
}

impl BlockRange {
	pub fn new(from: u64, to: u64) -> Self {
		Self { from, to }
	}

	pub fn len(&self) -> u64 {
		self.to.saturating_sub(self.from) + 1
	}

	pub fn is_empty(&self) -> bool {
		self.to < self.from
	}
}

impl fmt::Display for BlockRange {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}, {}]", self.from, self.to)
	}
}

/// Durable proof that a transaction was included in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
	pub transaction_hash: TxHash,
	pub block_number: u64,
	pub block_hash: Option<String>,
	/// `None` on pre-Byzantium nodes that do not report a status.
	pub status: Option<bool>,
	pub gas_used: Option<u64>,
	pub contract_address: Option<String>,
}

impl Receipt {
	/// Treats a missing status as success, matching how the node reported it before status codes.
	pub fn succeeded(&self) -> bool {
		self.status.unwrap_or(true)
	}
}

/// Receipt as the node serializes it. Quantities are hex strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
	pub transaction_hash: String,
	pub block_number: Option<String>,
	pub block_hash: Option<String>,
	pub status: Option<String>,
	pub gas_used: Option<String>,
	pub contract_address: Option<String>,
}

impl RpcReceipt {
	/// Converts to a [`Receipt`]. Returns `Ok(None)` for receipts that have no block yet,
	/// which some nodes report for transactions still in the pool.
	pub fn into_receipt(self) -> Result<Option<Receipt>, ChainError> {
		let Some(block_number) = self.block_number else {
			return Ok(None);
		};

		let status = self
			.status
			.as_deref()
			.map(parse_u64_quantity)
			.transpose()?
			.map(|s| s == 1);
		let gas_used = self.gas_used.as_deref().map(parse_u64_quantity).transpose()?;

		Ok(Some(Receipt {
			transaction_hash: TxHash(self.transaction_hash),
			block_number: parse_u64_quantity(&block_number)?,
			block_hash: self.block_hash,
			status,
			gas_used,
			contract_address: self.contract_address,
		}))
	}
}

/// A log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
	pub address: String,
	pub topics: Vec<String>,
	pub data: String,
	pub block_number: Option<String>,
	pub transaction_hash: Option<String>,
	pub log_index: Option<String>,
	/// Set when the log was dropped by a chain reorganisation.
	#[serde(default)]
	pub removed: bool,
}

/// Filter for `eth_getLogs`. Each topic position is a list of alternatives.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
	pub from_block: String,
	pub to_block: String,
	pub address: String,
	pub topics: Vec<Option<Vec<String>>>,
}

/// A resolved contract method call, ready for the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
	pub contract: String,
	pub method: String,
	/// `None` creates a contract from `data`.
	pub to: Option<String>,
	pub data: Vec<u8>,
}

/// Optional per-call overrides supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSettings {
	pub gas: Option<u64>,
	pub gas_price: Option<u128>,
	pub value: Option<u128>,
	pub nonce: Option<u64>,
}

impl CallSettings {
	pub fn with_gas(mut self, gas: u64) -> Self {
		self.gas = Some(gas);
		self
	}

	/// Fields set in `overrides` win; unset fields keep their current value.
	pub fn overridden_by(self, overrides: &CallSettings) -> Self {
		Self {
			gas: overrides.gas.or(self.gas),
			gas_price: overrides.gas_price.or(self.gas_price),
			value: overrides.value.or(self.value),
			nonce: overrides.nonce.or(self.nonce),
		}
	}
}

/// Error types for node requests
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
	#[error("RPC error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Invalid response: {0}")]
	InvalidResponse(String),

	#[error("Invalid hex value: {0}")]
	InvalidHex(#[from] HexValueError),
}
