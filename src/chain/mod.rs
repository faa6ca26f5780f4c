//! Chain node integration
//!
//! This module provides the JSON-RPC client and types for talking to the chain node: head
//! block queries, log queries for note events, and the transaction surface the engine uses.

/// JSON-RPC client and the `LedgerClient` trait
mod client;
/// Type definitions for node data structures
mod types;

pub use client::{JsonRpcClient, LedgerClient};
pub use types::*;
