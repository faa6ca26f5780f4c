use crate::chain::{Account, BlockRange};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a note: the note hash emitted as an indexed event argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteKey(pub String);

impl NoteKey {
	pub fn new(hash: impl AsRef<str>) -> Self {
		Self(hash.as_ref().to_ascii_lowercase())
	}
}

impl fmt::Display for NoteKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// A note as observed in one ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
	pub key: NoteKey,
	pub owner: Account,
	pub block_number: u64,
	pub log_index: u64,
	/// Encrypted note metadata as emitted on chain.
	pub payload: Vec<u8>,
}

/// Ledger event kinds, in the order they must be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NoteEventKind {
	Create,
	Update,
	Destroy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteEvent {
	Create(Note),
	Update(Note),
	Destroy(Note),
}

impl NoteEvent {
	pub fn kind(&self) -> NoteEventKind {
		match self {
			NoteEvent::Create(_) => NoteEventKind::Create,
			NoteEvent::Update(_) => NoteEventKind::Update,
			NoteEvent::Destroy(_) => NoteEventKind::Destroy,
		}
	}

	pub fn note(&self) -> &Note {
		match self {
			NoteEvent::Create(note) | NoteEvent::Update(note) | NoteEvent::Destroy(note) => note,
		}
	}
}

/// Categorized events for one account and one block range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteBatch {
	pub create_notes: Vec<Note>,
	pub update_notes: Vec<Note>,
	pub destroy_notes: Vec<Note>,
}

impl NoteBatch {
	pub fn push(&mut self, event: NoteEvent) {
		match event {
			NoteEvent::Create(note) => self.create_notes.push(note),
			NoteEvent::Update(note) => self.update_notes.push(note),
			NoteEvent::Destroy(note) => self.destroy_notes.push(note),
		}
	}

	pub fn len(&self) -> usize {
		self.create_notes.len() + self.update_notes.len() + self.destroy_notes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Flattens the batch into application order: every create, then every update, then
	/// every destroy, each category sorted by chain position.
	///
	/// This guarantees a note exists locally before it is updated or removed, regardless
	/// of the order the events were emitted in.
	pub fn into_ordered_events(self) -> Vec<NoteEvent> {
		fn by_position(mut notes: Vec<Note>) -> Vec<Note> {
			notes.sort_by_key(|note| (note.block_number, note.log_index));
			notes
		}

		let mut events = Vec::with_capacity(self.len());
		events.extend(by_position(self.create_notes).into_iter().map(NoteEvent::Create));
		events.extend(by_position(self.update_notes).into_iter().map(NoteEvent::Update));
		events.extend(by_position(self.destroy_notes).into_iter().map(NoteEvent::Destroy));
		events
	}
}

/// Counts of writes issued while applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
	pub range: Option<BlockRange>,
	pub created: usize,
	pub updated: usize,
	pub destroyed: usize,
}

impl ApplyReport {
	pub fn record(&mut self, kind: NoteEventKind) {
		match kind {
			NoteEventKind::Create => self.created += 1,
			NoteEventKind::Update => self.updated += 1,
			NoteEventKind::Destroy => self.destroyed += 1,
		}
	}

	pub fn total(&self) -> usize {
		self.created + self.updated + self.destroyed
	}
}

/// Error types for the local note ledger
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("Storage error: {0}")]
	Storage(String),

	#[error("Note {key} belongs to {owner}, not {account}")]
	OwnerMismatch {
		key: NoteKey,
		owner: Account,
		account: Account,
	},
}
