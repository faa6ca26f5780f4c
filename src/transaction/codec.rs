//! Call data encoding for contract methods.

use serde_json::{Value, json};
use std::fmt;

/// Turns method arguments into call data and return data back into JSON.
///
/// Each registered interface carries its own codec, so contracts with different
/// encodings can share one registry.
pub trait CallCodec: Send + Sync + fmt::Debug {
	fn encode_call(&self, method: &str, args: &[Value]) -> Result<Vec<u8>, CodecError>;

	fn decode_result(&self, method: &str, data: &[u8]) -> Result<Value, CodecError>;

	/// Creation data for a deployment: the contract bytecode followed by the encoded
	/// constructor arguments, if any.
	fn encode_deploy(&self, bytecode: &[u8], args: &[Value]) -> Result<Vec<u8>, CodecError> {
		let mut data = bytecode.to_vec();
		if !args.is_empty() {
			data.extend(self.encode_call("constructor", args)?);
		}
		Ok(data)
	}
}

/// Encodes a call as the JSON document `{"method": ..., "args": [...]}` and expects JSON
/// return data. Empty return data decodes to `null`.
///
/// This is not ABI encoding: EVM contracts cannot decode it. It suits nodes and test
/// doubles that speak the same JSON convention. Register interfaces for deployed EVM
/// contracts with an ABI codec through [`ContractInterface::with_codec`].
///
/// [`ContractInterface::with_codec`]: crate::transaction::ContractInterface::with_codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCallCodec;

impl CallCodec for JsonCallCodec {
	fn encode_call(&self, method: &str, args: &[Value]) -> Result<Vec<u8>, CodecError> {
		serde_json::to_vec(&json!({ "method": method, "args": args })).map_err(|e| {
			CodecError::Encode {
				method: method.to_string(),
				reason: e.to_string(),
			}
		})
	}

	fn decode_result(&self, method: &str, data: &[u8]) -> Result<Value, CodecError> {
		if data.is_empty() {
			return Ok(Value::Null);
		}
		serde_json::from_slice(data).map_err(|e| CodecError::Decode {
			method: method.to_string(),
			reason: e.to_string(),
		})
	}
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
	#[error("Failed to encode arguments for {method}: {reason}")]
	Encode { method: String, reason: String },

	#[error("Failed to decode result of {method}: {reason}")]
	Decode { method: String, reason: String },
}
