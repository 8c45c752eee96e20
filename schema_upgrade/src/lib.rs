//! SchemaUpgrade: applies ordered SQL upgrade scripts to one or more databases
//!
//! Each database keeps a ledger of the scripts already applied to it, so a run
//! only executes what is new. Scripts run one at a time, each in its own
//! transaction, and a database's run stops at its first failing script. Every
//! attempt is written to an audit log file and mirrored to the console.

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod runner;
pub mod scripts;
pub mod utils;

// Re-export main types for easier access
pub use audit::{ConsoleMirror, EntryStatus, FileLogSink, LogEntry, LogSink, MemoryLogSink};
pub use config::{Config, DatabaseConfig, ExecutionConfig, ScriptDiscoveryConfig};
pub use coordinator::{
    jobs_from_config, run_from_config, DatabaseJob, ProcessOutcome, RunCoordinator, RunSummary,
};
pub use db::{DatabaseConnection, Ledger, MigrationTarget, SqlExecutor};
pub use error::{Error, Result};
pub use runner::{DatabaseOutcome, FailurePoint, MigrationRunner, ScriptOutcome, Stage};
pub use scripts::{
    list_scripts, EmbeddedScriptProvider, FileSystemScriptProvider, ScriptProvider, ScriptUnit,
};

/// Load the configuration file, let `overrides` adjust it, validate the
/// result and set up tracing from its `[logging]` table
pub fn init(
    config_path: impl AsRef<std::path::Path>,
    overrides: impl FnOnce(&mut Config),
) -> Result<Config> {
    let mut config = config::read_from_file(config_path)?;
    overrides(&mut config);
    config.validate()?;
    utils::logging::init_logging(&config.logging)?;
    Ok(config)
}
