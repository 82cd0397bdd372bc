//! Ledger database connection and schema bootstrap

pub mod init;

pub use init::*;
