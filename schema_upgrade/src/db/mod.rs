//! Database module for SchemaUpgrade
//!
//! This module handles database connections, the applied-script ledger and
//! transactional script execution.

pub mod connection;
pub mod executor;
pub mod ledger;

// Re-export key types
pub use connection::{DatabaseConnection, Dialect, TransactionConnection};
pub use executor::{MigrationTarget, SqlExecutor};
pub use ledger::{AppliedScripts, Ledger};
