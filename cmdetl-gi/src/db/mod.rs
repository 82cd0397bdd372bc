//! Identifier ledger access for cmdetl-gi

pub mod ledger;
pub mod memory_ledger;

pub use ledger::{IdentifierLedger, PgLedger};
pub use memory_ledger::MemoryLedger;
