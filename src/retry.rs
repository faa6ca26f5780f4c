//! Bounded retry policy shared by the sync scheduler and the transaction engine.
//!
//! Intervals come from `backoff::ExponentialBackoff`; the attempt budget and the deadline
//! are enforced here against tokio's clock so they behave under paused test time too.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Why a retried operation gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
	#[error("permanent failure: {0}")]
	Permanent(E),

	#[error("gave up after {attempts} attempts: {last}")]
	Exhausted { attempts: u32, last: E },

	#[error("deadline of {deadline:?} elapsed after {attempts} attempts: {last}")]
	DeadlineElapsed {
		attempts: u32,
		deadline: Duration,
		last: E,
	},
}

impl<E> RetryError<E> {
	pub fn attempts(&self) -> u32 {
		match self {
			RetryError::Permanent(_) => 1,
			RetryError::Exhausted { attempts, .. }
			| RetryError::DeadlineElapsed { attempts, .. } => *attempts,
		}
	}

	pub fn into_inner(self) -> E {
		match self {
			RetryError::Permanent(e) => e,
			RetryError::Exhausted { last, .. } | RetryError::DeadlineElapsed { last, .. } => last,
		}
	}
}

/// Exponential backoff with an attempt cap and an optional overall deadline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Total attempts including the first one. Always at least 1.
	pub max_attempts: u32,
	#[serde(with = "millis")]
	pub initial_interval: Duration,
	pub multiplier: f64,
	#[serde(with = "millis")]
	pub max_interval: Duration,
	pub randomization_factor: f64,
	#[serde(with = "optional_millis")]
	pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			initial_interval: Duration::from_millis(500),
			multiplier: 2.0,
			max_interval: Duration::from_secs(30),
			randomization_factor: 0.0,
			deadline: None,
		}
	}
}

impl RetryPolicy {
	/// A policy that never retries.
	pub fn single_attempt() -> Self {
		Self {
			max_attempts: 1,
			..Self::default()
		}
	}

	/// Policy for receipt polling: starts at the node's usual one-second block cadence
	/// and backs off to fifteen seconds, giving up after ten minutes.
	pub fn receipt_polling() -> Self {
		Self {
			max_attempts: 120,
			initial_interval: Duration::from_secs(1),
			multiplier: 1.5,
			max_interval: Duration::from_secs(15),
			randomization_factor: 0.0,
			deadline: Some(Duration::from_secs(600)),
		}
	}

	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;
		self
	}

	pub fn with_initial_interval(mut self, interval: Duration) -> Self {
		self.initial_interval = interval;
		self
	}

	pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
		self.deadline = deadline;
		self
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.initial_interval)
			.with_multiplier(self.multiplier)
			.with_max_interval(self.max_interval)
			.with_randomization_factor(self.randomization_factor)
			.with_max_elapsed_time(None)
			.build()
	}

	/// Runs `operation` until it succeeds, fails permanently, or the budget runs out.
	///
	/// Classification follows the `backoff` crate: `Error::transient` is retried (honouring
	/// `retry_after` when given), `Error::permanent` stops immediately.
	pub async fn retry<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, backoff::Error<E>>>,
	{
		let max_attempts = self.max_attempts.max(1);
		let started = Instant::now();
		let mut backoff = self.backoff();
		let mut attempts = 0u32;

		loop {
			attempts += 1;
			let (last, retry_after) = match operation().await {
				Ok(value) => return Ok(value),
				Err(backoff::Error::Permanent(e)) => return Err(RetryError::Permanent(e)),
				Err(backoff::Error::Transient { err, retry_after }) => (err, retry_after),
			};

			if attempts >= max_attempts {
				return Err(RetryError::Exhausted { attempts, last });
			}

			let Some(delay) = retry_after.or_else(|| backoff.next_backoff()) else {
				return Err(RetryError::Exhausted { attempts, last });
			};

			if let Some(deadline) = self.deadline {
				if started.elapsed() + delay > deadline {
					return Err(RetryError::DeadlineElapsed {
						attempts,
						deadline,
						last,
					});
				}
			}

			debug!("Attempt {} failed, retrying in {:?}", attempts, delay);
			tokio::time::sleep(delay).await;
		}
	}
}

mod millis {
	use serde::{Deserialize, Deserializer};
	use std::time::Duration;

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		Ok(Duration::from_millis(u64::deserialize(deserializer)?))
	}
}

mod optional_millis {
	use serde::{Deserialize, Deserializer};
	use std::time::Duration;

	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<Option<Duration>, D::Error> {
		Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	#[tokio::test(start_paused = true)]
	async fn test_retry_succeeds_after_transient_failures() {
		let calls = &AtomicU32::new(0);
		let policy = RetryPolicy::default().with_initial_interval(Duration::from_millis(100));
		let started = Instant::now();

		let result: Result<u32, RetryError<&str>> = policy
			.retry(|| async move {
				let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
				if call < 3 {
					Err(backoff::Error::transient("not yet"))
				} else {
					Ok(call)
				}
			})
			.await;

		assert_eq!(result.unwrap(), 3);
		// 100ms then 200ms
		assert_eq!(started.elapsed(), Duration::from_millis(300));
	}

	#[tokio::test(start_paused = true)]
	async fn test_retry_stops_on_permanent_error() {
		let calls = &AtomicU32::new(0);
		let result: Result<(), RetryError<&str>> = RetryPolicy::default()
			.retry(|| async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(backoff::Error::permanent("boom"))
			})
			.await;

		assert!(matches!(result, Err(RetryError::Permanent("boom"))));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retry_exhausts_attempts() {
		let calls = &AtomicU32::new(0);
		let result: Result<(), RetryError<&str>> = RetryPolicy::default()
			.with_max_attempts(3)
			.retry(|| async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(backoff::Error::transient("down"))
			})
			.await;

		match result {
			Err(RetryError::Exhausted { attempts, last }) => {
				assert_eq!(attempts, 3);
				assert_eq!(last, "down");
			}
			other => panic!("unexpected result: {:?}", other),
		}
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retry_respects_deadline() {
		let policy = RetryPolicy::default()
			.with_max_attempts(100)
			.with_initial_interval(Duration::from_secs(1))
			.with_deadline(Some(Duration::from_secs(5)));

		let result: Result<(), RetryError<&str>> = policy
			.retry(|| async { Err(backoff::Error::transient("pending")) })
			.await;

		// 1s + 2s elapsed, the next 4s wait would overshoot the deadline
		match result {
			Err(RetryError::DeadlineElapsed { attempts, .. }) => assert_eq!(attempts, 3),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_single_attempt_never_sleeps() {
		let result: Result<(), RetryError<&str>> = RetryPolicy::single_attempt()
			.retry(|| async { Err(backoff::Error::transient("offline")) })
			.await;
		assert_eq!(result.unwrap_err().attempts(), 1);
	}
}
