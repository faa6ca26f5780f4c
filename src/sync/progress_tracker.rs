//! Progress tracking for note synchronization.
//!
//! Every tracked account owns a `SyncProgressTracker`. The scheduler records cycles,
//! applied batches and failures on it, and `SyncScheduler::status` exposes the
//! resulting `SyncStats`.

use crate::chain::BlockRange;
use crate::notes::ApplyReport;

use chrono::{DateTime, Utc};
use tracing::info;

/// Blocks between two progress log lines while catching up.
const LOG_EVERY_BLOCKS: u64 = 100_000;

/// Counters for one account's sync session
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
	/// Watermark when the account was first tracked
	start_block: u64,
	/// Highest block applied so far
	highest_applied_block: u64,
	cycles_started: u64,
	batches_applied: u64,
	notes_created: usize,
	notes_updated: usize,
	notes_destroyed: usize,
	consecutive_failures: u32,
	total_failures: u64,
	last_error: Option<String>,
	last_applied_range: Option<BlockRange>,
	last_success_at: Option<DateTime<Utc>>,
	/// Block at which progress was last logged
	last_logged_block: u64,
}

impl SyncProgressTracker {
	pub fn new(start_block: u64) -> Self {
		Self {
			start_block,
			highest_applied_block: start_block,
			cycles_started: 0,
			batches_applied: 0,
			notes_created: 0,
			notes_updated: 0,
			notes_destroyed: 0,
			consecutive_failures: 0,
			total_failures: 0,
			last_error: None,
			last_applied_range: None,
			last_success_at: None,
			last_logged_block: start_block,
		}
	}

	pub fn record_cycle_started(&mut self) {
		self.cycles_started += 1;
	}

	/// Record a batch written to the ledger. An empty range still counts as progress.
	pub fn record_applied(&mut self, report: &ApplyReport) {
		self.batches_applied += 1;
		self.notes_created += report.created;
		self.notes_updated += report.updated;
		self.notes_destroyed += report.destroyed;
		if let Some(range) = report.range {
			self.highest_applied_block = self.highest_applied_block.max(range.to);
			self.last_applied_range = Some(range);
		}
		self.record_success();
	}

	/// Record a cycle that found the account already at head.
	pub fn record_up_to_date(&mut self) {
		self.record_success();
	}

	pub fn record_failure(&mut self, error: &impl ToString) {
		self.consecutive_failures += 1;
		self.total_failures += 1;
		self.last_error = Some(error.to_string());
	}

	fn record_success(&mut self) {
		self.consecutive_failures = 0;
		self.last_success_at = Some(Utc::now());
	}

	/// Log progress every `LOG_EVERY_BLOCKS` applied blocks, or when forced
	pub fn log_progress(&mut self, account: &impl std::fmt::Display, force: bool) {
		let since_last_log = self
			.highest_applied_block
			.saturating_sub(self.last_logged_block);
		if force || since_last_log >= LOG_EVERY_BLOCKS {
			info!(
				"Sync progress for {}: block {} ({} created, {} updated, {} destroyed)",
				account,
				self.highest_applied_block,
				self.notes_created,
				self.notes_updated,
				self.notes_destroyed
			);
			self.last_logged_block = self.highest_applied_block;
		}
	}

	pub fn get_stats(&self) -> SyncStats {
		SyncStats {
			start_block: self.start_block,
			highest_applied_block: self.highest_applied_block,
			cycles_started: self.cycles_started,
			batches_applied: self.batches_applied,
			notes_created: self.notes_created,
			notes_updated: self.notes_updated,
			notes_destroyed: self.notes_destroyed,
			consecutive_failures: self.consecutive_failures,
			total_failures: self.total_failures,
			last_error: self.last_error.clone(),
			last_applied_range: self.last_applied_range,
			last_success_at: self.last_success_at,
		}
	}
}

/// Statistics about one account's sync progress
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStats {
	pub start_block: u64,
	pub highest_applied_block: u64,
	pub cycles_started: u64,
	pub batches_applied: u64,
	pub notes_created: usize,
	pub notes_updated: usize,
	pub notes_destroyed: usize,
	pub consecutive_failures: u32,
	pub total_failures: u64,
	pub last_error: Option<String>,
	pub last_applied_range: Option<BlockRange>,
	pub last_success_at: Option<DateTime<Utc>>,
}

impl SyncStats {
	/// Get a human-readable summary of the sync statistics
	pub fn summary(&self) -> String {
		format!(
			"Sync from {} to {}: {} batches, {} created, {} updated, {} destroyed{}",
			self.start_block,
			self.highest_applied_block,
			self.batches_applied,
			self.notes_created,
			self.notes_updated,
			self.notes_destroyed,
			if self.total_failures == 0 {
				String::new()
			} else {
				format!(" ({} failures)", self.total_failures)
			}
		)
	}
}
