/// Call data codecs
pub mod codec;
/// Submission and receipt polling
pub mod engine;
/// Past-event queries
pub mod events;
/// Contract interfaces and handles
pub mod registry;
/// Requests, outcomes, signing and errors
pub mod types;

pub use codec::{CallCodec, CodecError, JsonCallCodec};
pub use engine::TransactionEngine;
pub use events::{ContractEvent, EventQuery};
pub use registry::{
	ContractConfig, ContractHandle, ContractInterface, ContractRegistry, Deployment, MethodHandle,
	RegistryError,
};
pub use types::*;

/// Gas limit for calls and sends. Sends always use it; calls may override it.
pub const DEFAULT_GAS_CEILING: u64 = 6_500_000;

/// Gas price for signed sends when the caller gives none (4 gwei).
pub const DEFAULT_SIGNED_GAS_PRICE: u128 = 4_000_000_000;
