use crate::chain::{Account, CallSettings, ChainError, Receipt, TxHash};
use crate::transaction::codec::CodecError;
use crate::transaction::registry::{ContractHandle, ContractInterface, RegistryError};

use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
	/// Read-only call; nothing is mined.
	Call,
	/// Sent from an account unlocked on the node.
	Send,
	/// Signed locally and submitted as a raw transaction.
	SignedSend,
}

/// One contract method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRequest {
	pub kind: TransactionKind,
	pub contract_name: String,
	/// Overrides the contract's registered address.
	pub contract_address: Option<String>,
	pub method_name: String,
	pub args: Vec<Value>,
	pub account: Account,
	pub settings: CallSettings,
}

impl TransactionRequest {
	pub fn new(
		kind: TransactionKind,
		contract_name: impl Into<String>,
		method_name: impl Into<String>,
		account: impl Into<Account>,
	) -> Self {
		Self {
			kind,
			contract_name: contract_name.into(),
			contract_address: None,
			method_name: method_name.into(),
			args: Vec::new(),
			account: account.into(),
			settings: CallSettings::default(),
		}
	}

	pub fn at(mut self, address: impl Into<String>) -> Self {
		self.contract_address = Some(address.into());
		self
	}

	pub fn with_args(mut self, args: Vec<Value>) -> Self {
		self.args = args;
		self
	}

	pub fn with_settings(mut self, settings: CallSettings) -> Self {
		self.settings = settings;
		self
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
	/// Decoded return value of a `Call`.
	Value(Value),
	/// Receipt of a mined `Send` or `SignedSend`. May carry a failed status.
	Receipt(Receipt),
}

impl TransactionOutcome {
	pub fn into_receipt(self) -> Option<Receipt> {
		match self {
			TransactionOutcome::Receipt(receipt) => Some(receipt),
			TransactionOutcome::Value(_) => None,
		}
	}

	pub fn into_value(self) -> Option<Value> {
		match self {
			TransactionOutcome::Value(value) => Some(value),
			TransactionOutcome::Receipt(_) => None,
		}
	}
}

/// Creation of a new contract from its bytecode, sent from an unlocked account.
#[derive(Debug, Clone)]
pub struct DeployRequest {
	/// Name the deployed contract is registered under.
	pub name: String,
	pub interface: ContractInterface,
	pub bytecode: Vec<u8>,
	pub args: Vec<Value>,
	pub account: Account,
	pub settings: CallSettings,
}

impl DeployRequest {
	pub fn new(
		name: impl Into<String>,
		interface: ContractInterface,
		bytecode: Vec<u8>,
		account: impl Into<Account>,
	) -> Self {
		Self {
			name: name.into(),
			interface,
			bytecode,
			args: Vec::new(),
			account: account.into(),
			settings: CallSettings::default(),
		}
	}

	pub fn with_args(mut self, args: Vec<Value>) -> Self {
		self.args = args;
		self
	}

	pub fn with_settings(mut self, settings: CallSettings) -> Self {
		self.settings = settings;
		self
	}
}

/// A mined deployment and the handle registered for it.
#[derive(Debug, Clone)]
pub struct DeployedContract {
	pub contract: Arc<ContractHandle>,
	pub receipt: Receipt,
}

/// A transaction ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
	pub from: Account,
	pub to: String,
	pub data: Vec<u8>,
	pub gas: u64,
	pub gas_price: u128,
	pub value: Option<u128>,
	pub nonce: Option<u64>,
}

/// Signs transactions for `SignedSend`, returning the raw bytes to submit.
#[async_trait::async_trait]
pub trait TransactionSigner: Send + Sync {
	async fn sign(&self, transaction: &UnsignedTransaction) -> Result<Vec<u8>, SigningError>;
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SigningError(pub String);

/// Error types for transaction submission
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
	#[error("Contract resolution error: {0}")]
	Registry(#[from] RegistryError),

	#[error("Codec error: {0}")]
	Codec(#[from] CodecError),

	#[error("Call failed: {0}")]
	Call(ChainError),

	#[error("Gas estimation failed: {0}")]
	Estimation(ChainError),

	#[error("Submission failed: {0}")]
	Submission(ChainError),

	#[error("Signing failed: {0}")]
	Signing(#[from] SigningError),

	#[error("Signed sends need a transaction signer")]
	MissingSigner,

	#[error("Receipt query for {hash} failed: {source}")]
	ReceiptPoll { hash: TxHash, source: ChainError },

	#[error("No receipt for {hash} after {attempts} attempts")]
	ReceiptTimeout { hash: TxHash, attempts: u32 },

	#[error("Deployment {0} mined without a contract address")]
	MissingContractAddress(TxHash),

	#[error("Event query failed: {0}")]
	Events(ChainError),
}
