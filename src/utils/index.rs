use thiserror::Error;

/// Errors raised while decoding `0x`-prefixed JSON-RPC values.
#[derive(Debug, Error, PartialEq)]
pub enum HexValueError {
	#[error("missing 0x prefix in {0:?}")]
	MissingPrefix(String),

	#[error("invalid quantity {0:?}")]
	InvalidQuantity(String),

	#[error("invalid byte string: {0}")]
	InvalidBytes(#[from] hex::FromHexError),
}

/// Encodes a quantity the way JSON-RPC expects it: lower-case hex, no leading zeros.
pub fn to_quantity(value: u128) -> String {
	format!("{:#x}", value)
}

pub fn parse_quantity(value: &str) -> Result<u128, HexValueError> {
	let digits = value
		.strip_prefix("0x")
		.or_else(|| value.strip_prefix("0X"))
		.ok_or_else(|| HexValueError::MissingPrefix(value.to_string()))?;
	if digits.is_empty() {
		return Err(HexValueError::InvalidQuantity(value.to_string()));
	}
	u128::from_str_radix(digits, 16).map_err(|_| HexValueError::InvalidQuantity(value.to_string()))
}

/// Same as [`parse_quantity`] but for block numbers, gas and nonces.
pub fn parse_u64_quantity(value: &str) -> Result<u64, HexValueError> {
	let quantity = parse_quantity(value)?;
	u64::try_from(quantity).map_err(|_| HexValueError::InvalidQuantity(value.to_string()))
}

pub fn encode_bytes(bytes: &[u8]) -> String {
	format!("0x{}", hex::encode(bytes))
}

pub fn decode_bytes(value: &str) -> Result<Vec<u8>, HexValueError> {
	let digits = value
		.strip_prefix("0x")
		.ok_or_else(|| HexValueError::MissingPrefix(value.to_string()))?;
	Ok(hex::decode(digits)?)
}
