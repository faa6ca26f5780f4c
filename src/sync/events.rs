//! Notifications and error reporting for note synchronization.
//!
//! The scheduler publishes a `SyncNotification` on a broadcast channel at every step of a
//! cycle, so hosts can observe progress without polling `status`. Fetch and apply errors
//! are also handed to a `SyncErrorHandler`, which is the one place a host decides how
//! failures are surfaced.

use crate::chain::{Account, BlockRange};
use crate::notes::ApplyReport;
use crate::sync::types::{SyncError, SyncRequest};

use std::time::Duration;

/// Events published while syncing
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotification {
	/// A cycle began for the account
	CycleStarted(SyncRequest),
	/// A fetched range was written to the ledger and the watermark advanced
	BatchApplied {
		account: Account,
		report: ApplyReport,
	},
	/// Head was not ahead of the watermark
	UpToDate { account: Account, head: u64 },
	/// The account is still far behind head and continues immediately
	CatchingUp {
		account: Account,
		next_range_from: u64,
		remaining_gap: u64,
	},
	/// The next cycle runs after `delay`
	Scheduled {
		account: Account,
		last_synced_block: u64,
		delay: Duration,
	},
	Paused(SyncRequest),
	Resumed(SyncRequest),
	/// A fetch or apply failed. The watermark was not advanced.
	FetchFailed {
		account: Account,
		range: Option<BlockRange>,
		error: String,
	},
}

/// Hook invoked once per failed cycle.
pub trait SyncErrorHandler: Send + Sync {
	fn on_error(&self, account: &Account, error: &SyncError);
}

impl<F> SyncErrorHandler for F
where
	F: Fn(&Account, &SyncError) + Send + Sync,
{
	fn on_error(&self, account: &Account, error: &SyncError) {
		self(account, error)
	}
}

/// Default handler: logs the failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorHandler;

impl SyncErrorHandler for LogErrorHandler {
	fn on_error(&self, account: &Account, error: &SyncError) {
		tracing::error!("Sync failed for {}: {}", account, error);
	}
}
