//!
//! Utility module for the note sync crate.
//!
//! Re-exports hex helpers for JSON-RPC quantities and byte strings.
/// Hex quantity and byte string helpers
pub mod index;

pub use index::{
	HexValueError, decode_bytes, encode_bytes, parse_quantity, parse_u64_quantity, to_quantity,
};
