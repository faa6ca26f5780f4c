//! Chain event sources for note synchronization.
//!
//! `LogNoteSource` reads note lifecycle events from the note registry contract with
//! `eth_getLogs`, filtered to one owner, and sorts them into create, update and destroy
//! categories.

use crate::chain::{
	Account, BlockRange, ChainError, JsonRpcClient, LedgerClient, LogFilter, RpcLog,
};
use crate::notes::types::{Note, NoteBatch, NoteEvent, NoteEventKind, NoteKey};
use crate::utils::{decode_bytes, parse_u64_quantity, to_quantity};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Source of note events and of the chain head.
#[async_trait]
pub trait ChainEventSource: Send + Sync {
	/// Current head block number.
	async fn current_head(&self) -> Result<u64, ChainError>;

	/// Categorized note events for `account` in the inclusive `range`.
	async fn fetch_range(&self, account: &Account, range: BlockRange)
	-> Result<NoteBatch, ChainError>;
}

/// Topic hashes (`topics[0]`) of the three note lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEventTopics {
	pub create_note: String,
	pub update_note: String,
	pub destroy_note: String,
}

impl NoteEventTopics {
	fn all(&self) -> Vec<String> {
		vec![
			self.create_note.clone(),
			self.update_note.clone(),
			self.destroy_note.clone(),
		]
	}
}

/// Reads note events from the note registry's logs.
///
/// Events are expected to carry the owner as the first indexed argument (`topics[1]`) and
/// the note hash as the second (`topics[2]`); the non-indexed data is the note metadata.
#[derive(Clone)]
pub struct LogNoteSource {
	client: JsonRpcClient,
	registry_address: String,
	topics: NoteEventTopics,
}

impl LogNoteSource {
	pub fn new(client: JsonRpcClient, registry_address: String, topics: NoteEventTopics) -> Self {
		Self {
			client,
			registry_address: registry_address.to_ascii_lowercase(),
			topics: NoteEventTopics {
				create_note: topics.create_note.to_ascii_lowercase(),
				update_note: topics.update_note.to_ascii_lowercase(),
				destroy_note: topics.destroy_note.to_ascii_lowercase(),
			},
		}
	}

	fn filter(&self, account: &Account, range: BlockRange) -> LogFilter {
		LogFilter {
			from_block: to_quantity(range.from.into()),
			to_block: to_quantity(range.to.into()),
			address: self.registry_address.clone(),
			topics: vec![Some(self.topics.all()), Some(vec![account.as_topic()])],
		}
	}

	/// Turns one log into a note event. Returns `Ok(None)` for logs that are not note events.
	fn classify(&self, account: &Account, log: RpcLog) -> Result<Option<NoteEvent>, ChainError> {
		let Some(topic) = log.topics.first().map(|t| t.to_ascii_lowercase()) else {
			return Ok(None);
		};
		let kind = if topic == self.topics.create_note {
			NoteEventKind::Create
		} else if topic == self.topics.update_note {
			NoteEventKind::Update
		} else if topic == self.topics.destroy_note {
			NoteEventKind::Destroy
		} else {
			return Ok(None);
		};

		let note_hash = log.topics.get(2).ok_or_else(|| {
			ChainError::InvalidResponse(format!(
				"note event in tx {:?} is missing the note hash topic",
				log.transaction_hash
			))
		})?;
		let block_number = log
			.block_number
			.as_deref()
			.map(parse_u64_quantity)
			.transpose()?
			.ok_or_else(|| ChainError::InvalidResponse("log without block number".to_string()))?;
		let log_index = log
			.log_index
			.as_deref()
			.map(parse_u64_quantity)
			.transpose()?
			.unwrap_or_default();

		let note = Note {
			key: NoteKey::new(note_hash),
			owner: account.clone(),
			block_number,
			log_index,
			payload: decode_bytes(&log.data)?,
		};

		let event = match kind {
			NoteEventKind::Create => NoteEvent::Create(note),
			NoteEventKind::Update => NoteEvent::Update(note),
			NoteEventKind::Destroy => NoteEvent::Destroy(note),
		};
		Ok(Some(event))
	}

	/// Builds the batch for one fetched range, skipping removed and malformed logs.
	fn collect(&self, account: &Account, logs: Vec<RpcLog>) -> NoteBatch {
		let mut batch = NoteBatch::default();
		for log in logs {
			if log.removed {
				warn!("Skipping removed log in tx {:?}", log.transaction_hash);
				continue;
			}
			let transaction_hash = log.transaction_hash.clone();
			match self.classify(account, log) {
				Ok(Some(event)) => batch.push(event),
				Ok(None) => {}
				Err(e) => warn!(
					"Skipping malformed note log in tx {:?}: {}",
					transaction_hash, e
				),
			}
		}
		batch
	}
}

#[async_trait]
impl ChainEventSource for LogNoteSource {
	async fn current_head(&self) -> Result<u64, ChainError> {
		self.client.block_number().await
	}

	async fn fetch_range(
		&self,
		account: &Account,
		range: BlockRange,
	) -> Result<NoteBatch, ChainError> {
		let logs = self.client.get_logs(&self.filter(account, range)).await?;
		debug!("Fetched {} logs for {} in {}", logs.len(), account, range);

		Ok(self.collect(account, logs))
	}
}
