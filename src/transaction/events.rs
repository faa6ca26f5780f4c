//! Past-event queries against registered contracts.

use crate::chain::{ChainError, LogFilter, RpcLog, TxHash};
use crate::transaction::registry::{ContractHandle, ContractInterface, RegistryError};
use crate::utils::{decode_bytes, parse_u64_quantity, to_quantity};

/// Which logs of one contract to read.
///
/// `event` selects one named event of the interface; `None` reads every log the contract
/// emitted. Topic filters apply to the indexed arguments, `topics[1]` onwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
	pub event: Option<String>,
	pub from_block: u64,
	/// `None` reads up to the latest block.
	pub to_block: Option<u64>,
	pub topics: Vec<Option<Vec<String>>>,
}

impl EventQuery {
	/// One named event, from block 1 to the latest block.
	pub fn event(name: impl Into<String>) -> Self {
		Self {
			event: Some(name.into()),
			from_block: 1,
			to_block: None,
			topics: Vec::new(),
		}
	}

	/// Every log of the contract since genesis.
	pub fn all() -> Self {
		Self {
			event: None,
			from_block: 0,
			to_block: None,
			topics: Vec::new(),
		}
	}

	pub fn from_block(mut self, block: u64) -> Self {
		self.from_block = block;
		self
	}

	pub fn to_block(mut self, block: u64) -> Self {
		self.to_block = Some(block);
		self
	}

	/// Matches the indexed argument `index` (0-based) against any of `values`.
	pub fn where_topic(mut self, index: usize, values: Vec<String>) -> Self {
		if self.topics.len() <= index {
			self.topics.resize(index + 1, None);
		}
		self.topics[index] = Some(values.into_iter().map(|v| v.to_ascii_lowercase()).collect());
		self
	}

	/// The `eth_getLogs` filter for this query on `contract`.
	pub fn filter_for(&self, contract: &ContractHandle) -> Result<LogFilter, RegistryError> {
		let event_topic = match &self.event {
			Some(event) => {
				let topic = contract.interface.event_topic(event).ok_or_else(|| {
					RegistryError::UnknownEvent {
						contract: contract.name.clone(),
						event: event.clone(),
					}
				})?;
				Some(vec![topic.to_string()])
			}
			None => None,
		};

		let mut topics = vec![event_topic];
		topics.extend(self.topics.iter().cloned());
		while topics.last() == Some(&None) {
			topics.pop();
		}

		Ok(LogFilter {
			from_block: to_quantity(self.from_block.into()),
			to_block: match self.to_block {
				Some(block) => to_quantity(block.into()),
				None => "latest".to_string(),
			},
			address: contract.address.clone(),
			topics,
		})
	}
}

/// A decoded contract log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractEvent {
	/// Name of the event when the interface knows its topic.
	pub event: Option<String>,
	pub address: String,
	pub topics: Vec<String>,
	pub data: Vec<u8>,
	pub block_number: Option<u64>,
	pub transaction_hash: Option<TxHash>,
	pub log_index: Option<u64>,
}

impl ContractEvent {
	pub fn from_log(interface: &ContractInterface, log: RpcLog) -> Result<Self, ChainError> {
		let event = log
			.topics
			.first()
			.and_then(|topic| interface.event_name(topic))
			.map(str::to_string);
		let block_number = log.block_number.as_deref().map(parse_u64_quantity).transpose()?;
		let log_index = log.log_index.as_deref().map(parse_u64_quantity).transpose()?;

		Ok(Self {
			event,
			address: log.address.to_ascii_lowercase(),
			data: decode_bytes(&log.data)?,
			topics: log.topics,
			block_number,
			transaction_hash: log.transaction_hash.map(TxHash),
			log_index,
		})
	}
}
