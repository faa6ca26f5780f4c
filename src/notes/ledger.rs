use crate::chain::Account;
use crate::notes::types::{LedgerError, Note, NoteKey};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, warn};

/// Local note store written by the sync scheduler.
///
/// Every operation must be idempotent: a restart in the middle of a cycle replays the
/// same block range, so the same create, update or destroy can arrive more than once.
#[async_trait]
pub trait NoteLedgerWriter: Send + Sync {
	/// Insert the note, or overwrite it with identical content if it already exists.
	async fn create(&self, account: &Account, note: &Note) -> Result<(), LedgerError>;

	/// Replace the note's metadata.
	async fn update(&self, account: &Account, note: &Note) -> Result<(), LedgerError>;

	/// Mark the note destroyed. Destroying an unknown or already destroyed note is a no-op.
	async fn destroy(&self, account: &Account, note: &Note) -> Result<(), LedgerError>;
}

/// A note as held by the local ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNote {
	pub note: Note,
	pub destroyed: bool,
	/// Block of the last event that touched this note.
	pub last_modified_block: u64,
}

type NoteMap = HashMap<(Account, NoteKey), StoredNote>;

/// In-memory ledger keyed by (account, note key).
#[derive(Default)]
pub struct InMemoryNoteLedger {
	notes: RwLock<NoteMap>,
}

impl InMemoryNoteLedger {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, account: &Account, key: &NoteKey) -> Option<StoredNote> {
		self.notes
			.read()
			.ok()?
			.get(&(account.clone(), key.clone()))
			.cloned()
	}

	/// Notes of `account` that have not been destroyed.
	pub fn live_notes(&self, account: &Account) -> Vec<Note> {
		let Ok(notes) = self.notes.read() else {
			return Vec::new();
		};
		let mut live: Vec<Note> = notes
			.iter()
			.filter(|((owner, _), stored)| owner == account && !stored.destroyed)
			.map(|(_, stored)| stored.note.clone())
			.collect();
		live.sort_by(|a, b| a.key.cmp(&b.key));
		live
	}

	pub fn len(&self) -> usize {
		self.notes.read().map(|notes| notes.len()).unwrap_or_default()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn check_owner(account: &Account, note: &Note) -> Result<(), LedgerError> {
		if &note.owner != account {
			return Err(LedgerError::OwnerMismatch {
				key: note.key.clone(),
				owner: note.owner.clone(),
				account: account.clone(),
			});
		}
		Ok(())
	}

	fn write(&self) -> Result<RwLockWriteGuard<'_, NoteMap>, LedgerError> {
		self.notes
			.write()
			.map_err(|e| LedgerError::Storage(format!("note store lock poisoned: {}", e)))
	}
}

#[async_trait]
impl NoteLedgerWriter for InMemoryNoteLedger {
	async fn create(&self, account: &Account, note: &Note) -> Result<(), LedgerError> {
		Self::check_owner(account, note)?;
		let mut notes = self.write()?;
		let entry = notes
			.entry((account.clone(), note.key.clone()))
			.or_insert_with(|| StoredNote {
				note: note.clone(),
				destroyed: false,
				last_modified_block: note.block_number,
			});
		// A replayed create must not resurrect or roll back a note that later events touched.
		if entry.last_modified_block <= note.block_number && !entry.destroyed {
			entry.note = note.clone();
			entry.last_modified_block = note.block_number;
		}
		debug!("Stored note {} for {}", note.key, account);
		Ok(())
	}

	async fn update(&self, account: &Account, note: &Note) -> Result<(), LedgerError> {
		Self::check_owner(account, note)?;
		let mut notes = self.write()?;
		match notes.get_mut(&(account.clone(), note.key.clone())) {
			Some(stored) => {
				if stored.last_modified_block <= note.block_number {
					stored.note.payload = note.payload.clone();
					stored.last_modified_block = note.block_number;
				}
			}
			None => {
				warn!(
					"Update for unknown note {} of {}, storing it as new",
					note.key, account
				);
				notes.insert(
					(account.clone(), note.key.clone()),
					StoredNote {
						note: note.clone(),
						destroyed: false,
						last_modified_block: note.block_number,
					},
				);
			}
		}
		Ok(())
	}

	async fn destroy(&self, account: &Account, note: &Note) -> Result<(), LedgerError> {
		Self::check_owner(account, note)?;
		let mut notes = self.write()?;
		let entry = notes
			.entry((account.clone(), note.key.clone()))
			.or_insert_with(|| StoredNote {
				note: note.clone(),
				destroyed: true,
				last_modified_block: note.block_number,
			});
		entry.destroyed = true;
		entry.last_modified_block = entry.last_modified_block.max(note.block_number);
		debug!("Destroyed note {} for {}", note.key, account);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn note(key: &str, block_number: u64, payload: &[u8]) -> Note {
		Note {
			key: NoteKey::new(key),
			owner: Account::new("0x01"),
			block_number,
			log_index: 0,
			payload: payload.to_vec(),
		}
	}

	#[tokio::test]
	async fn test_writes_are_idempotent() {
		let ledger = InMemoryNoteLedger::new();
		let account = Account::new("0x01");

		for _ in 0..2 {
			ledger.create(&account, &note("0xa", 1, b"m1")).await.unwrap();
			ledger.update(&account, &note("0xa", 2, b"m2")).await.unwrap();
		}

		let stored = ledger.get(&account, &NoteKey::new("0xa")).unwrap();
		assert_eq!(stored.note.payload, b"m2".to_vec());
		assert_eq!(stored.last_modified_block, 2);
		assert_eq!(ledger.len(), 1);

		ledger.destroy(&account, &note("0xa", 3, b"")).await.unwrap();
		ledger.destroy(&account, &note("0xa", 3, b"")).await.unwrap();
		assert!(ledger.live_notes(&account).is_empty());
		assert!(ledger.get(&account, &NoteKey::new("0xa")).unwrap().destroyed);
	}

	#[tokio::test]
	async fn test_replayed_create_does_not_resurrect() {
		let ledger = InMemoryNoteLedger::new();
		let account = Account::new("0x01");

		ledger.create(&account, &note("0xa", 1, b"m1")).await.unwrap();
		ledger.destroy(&account, &note("0xa", 5, b"")).await.unwrap();
		ledger.create(&account, &note("0xa", 1, b"m1")).await.unwrap();

		assert!(ledger.get(&account, &NoteKey::new("0xa")).unwrap().destroyed);
	}

	#[tokio::test]
	async fn test_rejects_foreign_notes() {
		let ledger = InMemoryNoteLedger::new();
		let result = ledger
			.create(&Account::new("0x02"), &note("0xa", 1, b""))
			.await;
		assert!(matches!(result, Err(LedgerError::OwnerMismatch { .. })));
		assert!(ledger.is_empty());
	}
}
