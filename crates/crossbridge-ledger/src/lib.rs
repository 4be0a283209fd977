//! # crossbridge-ledger
//!
//! **Record Plane**: the only mutable shared state in Crossbridge.
//!
//! ## Architecture
//!
//! - [`OperationStore`] owns every operation and every status change. It
//!   assigns ids from an owned sequence, locks per operation, and writes
//!   each change to a [`JournalSink`] before applying it.
//! - [`ValidatorRegistry`] holds the validator and operator roles.
//! - The journal ([`MemoryJournal`], [`FileJournal`]) is append-only and
//!   replays into an identical store on restart.

pub mod journal;
pub mod registry;
pub mod store;

pub use journal::{FileJournal, JournalEvent, JournalRecord, JournalSink, MemoryJournal};
pub use registry::ValidatorRegistry;
pub use store::{OperationEntry, OperationStore};
