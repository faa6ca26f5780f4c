//! Per-account sync state and the pure rules that drive it.
//!
//! Nothing here touches the network or timers: `SyncPhase::on` is the transition table,
//! `plan_window` decides what range a cycle fetches, and `next_step` decides whether a
//! finished cycle continues immediately or waits. The scheduler's worker applies them.

use crate::chain::{Account, BlockRange};
use crate::sync::config::SyncConfig;
use crate::sync::progress_tracker::SyncProgressTracker;
use crate::sync::types::{SyncError, SyncRequest, SyncStatus};

use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
	/// Tracked but no cycle running or scheduled.
	Idle,
	/// Querying head or fetching a range.
	Fetching,
	/// Writing a fetched batch to the ledger.
	Applying,
	/// A timed cycle is scheduled.
	Waiting,
	/// Parked until `resume`.
	Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
	CycleStarted,
	EventsFetched,
	/// The cycle ended far enough behind head to continue immediately.
	CatchUp,
	/// A timed cycle was scheduled.
	Rescheduled,
	FetchFailed,
	PauseRequested,
	Resumed,
}

impl SyncPhase {
	pub fn is_syncing(self) -> bool {
		matches!(self, SyncPhase::Fetching | SyncPhase::Applying)
	}

	/// The transition table. Anything not listed is rejected.
	pub fn on(self, trigger: SyncTrigger) -> Result<SyncPhase, SyncError> {
		use SyncPhase::*;
		use SyncTrigger::*;

		let next = match (self, trigger) {
			(Idle | Waiting, CycleStarted) => Fetching,
			(Fetching, EventsFetched) => Applying,
			(Fetching | Applying, CatchUp) => Fetching,
			(Idle | Fetching | Applying, Rescheduled) => Waiting,
			(Fetching | Applying, FetchFailed) => Idle,
			(Idle | Fetching | Applying | Waiting, PauseRequested) => Paused,
			(Paused, Resumed) => Idle,
			(from, trigger) => return Err(SyncError::InvalidTransition { from, trigger }),
		};
		Ok(next)
	}
}

/// The range one cycle fetches and how far behind head it leaves the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
	pub range: BlockRange,
	pub remaining_gap: u64,
}

/// Plans the next fetch window, or `None` when the account is already at head.
///
/// The window starts right after the watermark and covers at most
/// `block_span_per_request` blocks, clamped to head.
pub fn plan_window(config: &SyncConfig, last_synced_block: u64, head: u64) -> Option<SyncWindow> {
	if head <= last_synced_block {
		return None;
	}
	let from = last_synced_block + 1;
	let span = config.block_span_per_request.max(1);
	let to = from.saturating_add(span - 1).min(head);
	Some(SyncWindow {
		range: BlockRange::new(from, to),
		remaining_gap: head - to,
	})
}

/// What a finished cycle does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
	CatchUp,
	Wait(Duration),
}

pub fn next_step(config: &SyncConfig, remaining_gap: u64) -> NextStep {
	if remaining_gap > config.catch_up_threshold {
		NextStep::CatchUp
	} else {
		NextStep::Wait(config.poll_interval())
	}
}

/// A scheduled cycle. Only a `TimerFired` carrying the same generation may start it.
#[derive(Debug)]
pub struct PendingTimer {
	pub generation: u64,
	pub request: SyncRequest,
	pub handle: AbortHandle,
	pub due: Instant,
}

/// Everything the scheduler knows about one account.
#[derive(Debug)]
pub struct SyncState {
	pub account: Account,
	pub last_synced_block: u64,
	pub phase: SyncPhase,
	pub pending_timer: Option<PendingTimer>,
	pub paused_continuation: Option<SyncRequest>,
	pub progress: SyncProgressTracker,
	timer_generation: u64,
}

impl SyncState {
	pub fn new(account: Account, last_synced_block: u64) -> Self {
		Self {
			account,
			last_synced_block,
			phase: SyncPhase::Idle,
			pending_timer: None,
			paused_continuation: None,
			progress: SyncProgressTracker::new(last_synced_block),
			timer_generation: 0,
		}
	}

	pub fn is_syncing(&self) -> bool {
		self.phase.is_syncing()
	}

	pub fn apply(&mut self, trigger: SyncTrigger) -> Result<(), SyncError> {
		self.phase = self.phase.on(trigger)?;
		Ok(())
	}

	/// Raises the watermark. Lower values are ignored.
	pub fn advance_to(&mut self, block: u64) {
		self.last_synced_block = self.last_synced_block.max(block);
	}

	pub fn request(&self) -> SyncRequest {
		SyncRequest {
			account: self.account.clone(),
			last_synced_block: self.last_synced_block,
		}
	}

	pub fn next_generation(&mut self) -> u64 {
		self.timer_generation += 1;
		self.timer_generation
	}

	/// Aborts the pending timer, returning the request it would have run.
	pub fn cancel_timer(&mut self) -> Option<SyncRequest> {
		self.pending_timer.take().map(|timer| {
			timer.handle.abort();
			timer.request
		})
	}

	/// Takes the pending timer if `generation` is the current one.
	pub fn take_timer(&mut self, generation: u64) -> Option<PendingTimer> {
		match &self.pending_timer {
			Some(timer) if timer.generation == generation => self.pending_timer.take(),
			_ => None,
		}
	}

	pub fn status(&self) -> SyncStatus {
		SyncStatus {
			account: self.account.clone(),
			last_synced_block: self.last_synced_block,
			phase: self.phase,
			is_syncing: self.is_syncing(),
			paused_continuation: self.paused_continuation.clone(),
			next_cycle_in: self
				.pending_timer
				.as_ref()
				.map(|timer| timer.due.saturating_duration_since(Instant::now())),
			stats: self.progress.get_stats(),
		}
	}
}
