use crate::chain::{Account, ChainError};
use crate::notes::LedgerError;
use crate::sync::progress_tracker::SyncStats;
use crate::sync::state::{SyncPhase, SyncTrigger};

use std::time::Duration;

/// A request to run one sync cycle for an account starting after `last_synced_block`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
	pub account: Account,
	pub last_synced_block: u64,
}

impl SyncRequest {
	pub fn new(account: impl Into<Account>, last_synced_block: u64) -> Self {
		Self {
			account: account.into(),
			last_synced_block,
		}
	}
}

/// Point-in-time view of one tracked account.
#[derive(Debug, Clone)]
pub struct SyncStatus {
	pub account: Account,
	pub last_synced_block: u64,
	pub phase: SyncPhase,
	pub is_syncing: bool,
	/// The request a `resume` would run, when paused.
	pub paused_continuation: Option<SyncRequest>,
	/// Time left until the scheduled cycle, if one is pending.
	pub next_cycle_in: Option<Duration>,
	pub stats: SyncStats,
}

/// Error types for the sync scheduler
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Fetch error: {0}")]
	Fetch(#[from] ChainError),

	#[error("Fetch failed after {attempts} attempts: {last}")]
	FetchRetriesExhausted { attempts: u32, last: ChainError },

	#[error("Apply error: {0}")]
	Apply(#[from] LedgerError),

	#[error("Account {0} is not tracked")]
	UntrackedAccount(Account),

	#[error("Account {0} is not paused")]
	NotPaused(Account),

	#[error("Account {0} is already paused")]
	AlreadyPaused(Account),

	#[error("Invalid sync configuration: {0}")]
	InvalidConfig(String),

	#[error("Invalid transition from {from:?} on {trigger:?}")]
	InvalidTransition { from: SyncPhase, trigger: SyncTrigger },

	#[error("Sync scheduler has stopped")]
	SchedulerStopped,

	#[error("Persistence error: {0}")]
	Persistence(String),
}
