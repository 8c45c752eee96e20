//! Run coordinator
//!
//! Upgrades every configured database in order, one after the other, and
//! folds their outcomes into a single process result.

use std::sync::Arc;
use std::time::Duration;

use crate::audit::{LogEntry, LogSink};
use crate::config::{Config, DatabaseConfig, ExecutionConfig, ScriptDiscoveryConfig};
use crate::db::{MigrationTarget, SqlExecutor};
use crate::error::Result;
use crate::runner::{DatabaseOutcome, MigrationRunner, Stage};
use crate::scripts::{FileSystemScriptProvider, ScriptProvider};

/// Exit status used when any database failed
pub const FAILURE_EXIT_CODE: u8 = 255;

/// A database together with the scripts it should receive
pub struct DatabaseJob {
    pub config: DatabaseConfig,
    pub scripts: Box<dyn ScriptProvider>,
}

impl DatabaseJob {
    pub fn new(config: DatabaseConfig, scripts: Box<dyn ScriptProvider>) -> Self {
        Self { config, scripts }
    }

    /// Read scripts from the database's configured directory
    pub fn from_config(config: &DatabaseConfig, discovery: &ScriptDiscoveryConfig) -> Result<Self> {
        let provider = FileSystemScriptProvider::with_options(&config.script_path, discovery)?;
        Ok(Self::new(config.clone(), Box::new(provider)))
    }
}

/// Build one job per configured database, keeping configuration order
pub fn jobs_from_config(config: &Config) -> Result<Vec<DatabaseJob>> {
    config
        .databases
        .iter()
        .map(|db| DatabaseJob::from_config(db, &config.scripts))
        .collect()
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    PartialOrTotalFailure,
}

/// Outcome of every database, in the order they ran
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub databases: Vec<(String, DatabaseOutcome)>,
}

impl RunSummary {
    /// Success only when every database succeeded
    pub fn process_outcome(&self) -> ProcessOutcome {
        if self.databases.iter().all(|(_, outcome)| outcome.is_success()) {
            ProcessOutcome::Success
        } else {
            ProcessOutcome::PartialOrTotalFailure
        }
    }

    /// Shorthand for [`ProcessOutcome::Success`]
    pub fn is_success(&self) -> bool {
        self.process_outcome() == ProcessOutcome::Success
    }

    /// Process exit status for this run
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            FAILURE_EXIT_CODE
        }
    }

    /// Outcome of the database named `database`, if it ran
    pub fn outcome(&self, database: &str) -> Option<&DatabaseOutcome> {
        self.databases
            .iter()
            .find(|(name, _)| name == database)
            .map(|(_, outcome)| outcome)
    }
}

/// Drives the migration runner over a list of databases
pub struct RunCoordinator {
    execution: ExecutionConfig,
    sink: Arc<dyn LogSink>,
}

impl RunCoordinator {
    pub fn new(execution: ExecutionConfig, sink: Arc<dyn LogSink>) -> Self {
        Self { execution, sink }
    }

    /// Upgrade each database in turn.
    ///
    /// A failing database never stops the ones after it. The only error
    /// returned is a log write failure, which ends the whole run.
    pub async fn run(&self, jobs: Vec<DatabaseJob>) -> Result<RunSummary> {
        let timeout = Duration::from_secs(self.execution.timeout_seconds);
        let mut summary = RunSummary::default();

        for job in jobs {
            let name = job.config.name.as_str();
            self.sink.append(&LogEntry::banner(name))?;
            tracing::info!(database = name, driver = %job.config.driver, "Upgrading database");

            let mut runner = MigrationRunner::new(name, self.sink.as_ref(), timeout);
            let outcome = match SqlExecutor::open(&job.config, &self.execution).await {
                Ok(target) => {
                    let outcome = runner.run(&target, job.scripts.as_ref()).await;
                    target.close().await;
                    outcome?
                }
                Err(e) => runner.abort(Stage::Connect, e)?,
            };

            tracing::info!(database = name, success = outcome.is_success(), "Database finished");
            summary.databases.push((job.config.name.clone(), outcome));
        }

        Ok(summary)
    }
}

/// Load every database from `config` and upgrade them
pub async fn run_from_config(config: &Config, sink: Arc<dyn LogSink>) -> Result<RunSummary> {
    let jobs = jobs_from_config(config)?;
    RunCoordinator::new(config.execution.clone(), sink)
        .run(jobs)
        .await
}
