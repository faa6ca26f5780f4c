//! Keeps a local note ledger consistent with an on-chain note registry, and submits
//! contract transactions while waiting for their receipts.

/// JSON-RPC node client and chain types
pub mod chain;
/// Binary configuration
pub mod config;
/// Notes, their events, sources and the local ledger
pub mod notes;
/// Bounded retry policy
pub mod retry;
/// Per-account sync scheduler
pub mod sync;
/// Contract registry and transaction engine
pub mod transaction;
/// Hex helpers
pub mod utils;
