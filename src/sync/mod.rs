//! Note Synchronization Module
//!
//! Keeps a local note ledger in step with the on-chain note registry, one account at a time.
//!
//! - `scheduler`: The handle and worker task that run fetch and apply cycles for every
//!   tracked account.
//! - `state`: Per-account state, the phase transition table and the window planning rules.
//! - `config`: Scheduler tuning and the deployment environment.
//! - `events`: Notifications published during sync and the error reporting hook.
//! - `breaker`: The circuit breaker that halts every account after a development failure.
//! - `progress_tracker`: Per-account counters exposed through status snapshots.
//! - `repositories`: Persistence of per-account watermarks.
//!
//! A cycle queries the head, fetches one bounded block range, applies it create, update,
//! destroy and advances the watermark. It then either continues immediately while the
//! account is far behind, or waits for the poll interval.

/// Circuit breaker shared with the host
pub mod breaker;
/// Scheduler configuration
pub mod config;
/// Sync notifications and error hook
pub mod events;
/// Per-account progress statistics
pub mod progress_tracker;
/// Watermark persistence
pub mod repositories;
/// Scheduler handle and worker
pub mod scheduler;
/// Per-account state machine
pub mod state;
/// Requests, status snapshots and errors
pub mod types;

pub use breaker::CircuitBreaker;
pub use config::{Environment, SyncConfig, SyncConfigUpdate};
pub use events::{LogErrorHandler, SyncErrorHandler, SyncNotification};
pub use progress_tracker::SyncStats;
pub use repositories::{FileWatermarkRepository, WatermarkRepository};
pub use scheduler::{SyncScheduler, SyncSchedulerBuilder};
pub use state::{SyncPhase, SyncTrigger};
pub use types::*;
