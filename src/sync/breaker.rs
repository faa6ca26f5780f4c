//! Circuit breaker shared between a scheduler and its host.

use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

/// Halts every account of a scheduler once tripped.
///
/// Cloning shares the same flag, so the host keeps a clone to inspect or clear it.
/// Clearing does not restart anything; call `SyncScheduler::resume_all` afterwards.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
	tripped: Arc<AtomicBool>,
}

impl CircuitBreaker {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn trip(&self) {
		self.tripped.store(true, Ordering::Release);
	}

	pub fn clear(&self) {
		self.tripped.store(false, Ordering::Release);
	}

	pub fn is_tripped(&self) -> bool {
		self.tripped.load(Ordering::Acquire)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_clones_share_state() {
		let breaker = CircuitBreaker::new();
		let host = breaker.clone();
		assert!(!host.is_tripped());

		breaker.trip();
		assert!(host.is_tripped());

		host.clear();
		assert!(!breaker.is_tripped());
	}
}
