//! Persistence for the tradeloop engine.
//!
//! This crate provides:
//! - The bounded decision ledger and its JSON-file and in-memory stores
//! - Trailing stop state stores (JSON file and in-memory)

mod json_file;
pub mod ledger;
pub mod trailing_store;

pub use ledger::{DecisionLedger, JsonFileLedgerStore, MemoryLedgerStore, DEFAULT_LEDGER_CAPACITY};
pub use trailing_store::{JsonFileTrailingStore, MemoryTrailingStore};
