//! Note ledger module
//!
//! Note events as read from the chain, the local ledger they are applied to, and the
//! chain event sources that produce them.

/// Local note ledger and its writer trait
pub mod ledger;
/// Chain event sources
pub mod source;
/// Note and batch types
pub mod types;

pub use ledger::{InMemoryNoteLedger, NoteLedgerWriter, StoredNote};
pub use source::{ChainEventSource, LogNoteSource, NoteEventTopics};
pub use types::*;
