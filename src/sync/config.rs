use crate::sync::types::SyncError;

use serde::Deserialize;
use std::time::Duration;

/// Tuning for the sync scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
	/// Delay between cycles once the account is close to head.
	pub poll_interval_ms: u64,
	/// Number of blocks requested per fetch.
	pub block_span_per_request: u64,
	/// How far behind head a cycle may end before the next one runs immediately.
	pub catch_up_threshold: u64,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			poll_interval_ms: 5000,
			// About a week of blocks
			block_span_per_request: 45000,
			catch_up_threshold: 10,
		}
	}
}

impl SyncConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn validate(&self) -> Result<(), SyncError> {
		if self.poll_interval_ms == 0 {
			return Err(SyncError::InvalidConfig(
				"pollIntervalMs must be greater than zero".to_string(),
			));
		}
		if self.block_span_per_request == 0 {
			return Err(SyncError::InvalidConfig(
				"blockSpanPerRequest must be greater than zero".to_string(),
			));
		}
		Ok(())
	}

	/// Returns a copy with the provided keys overwritten. The result is validated as a
	/// whole so a bad update leaves the current configuration untouched.
	pub fn merged(&self, update: &SyncConfigUpdate) -> Result<SyncConfig, SyncError> {
		let merged = SyncConfig {
			poll_interval_ms: update.poll_interval_ms.unwrap_or(self.poll_interval_ms),
			block_span_per_request: update
				.block_span_per_request
				.unwrap_or(self.block_span_per_request),
			catch_up_threshold: update.catch_up_threshold.unwrap_or(self.catch_up_threshold),
		};
		merged.validate()?;
		Ok(merged)
	}
}

/// Partial configuration for [`SyncScheduler::configure`](crate::sync::SyncScheduler::configure).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfigUpdate {
	pub poll_interval_ms: Option<u64>,
	pub block_span_per_request: Option<u64>,
	pub catch_up_threshold: Option<u64>,
}

impl SyncConfigUpdate {
	/// Rejects values that no configuration may hold, independent of what they merge into.
	pub fn validate(&self) -> Result<(), SyncError> {
		SyncConfig::default().merged(self).map(|_| ())
	}
}

/// Deployment environment. Decides what a failed fetch does to the circuit breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
	/// A fetch failure trips the circuit breaker and halts every account.
	Development,
	/// A fetch failure is retried on the next timed cycle.
	#[default]
	Production,
}
