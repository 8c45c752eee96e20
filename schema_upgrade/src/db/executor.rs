//! Script executor
//!
//! This module applies one script at a time against a target database, each
//! inside its own transaction together with its ledger record.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Executor;
use std::time::{Duration, Instant};

use crate::config::{DatabaseConfig, ExecutionConfig};
use crate::db::connection::{with_pool, DatabaseConnection};
use crate::db::ledger::{AppliedScripts, Ledger};
use crate::error::{Error, Result};
use crate::scripts::ScriptUnit;

/// A database the migration runner can bring up to date
#[async_trait]
pub trait MigrationTarget: Send + Sync {
    /// Create the applied-script ledger when missing
    async fn ensure_ledger(&self) -> Result<()>;

    /// Scripts already recorded in the ledger
    async fn applied_scripts(&self) -> Result<AppliedScripts>;

    /// Run a script and record it, both or neither.
    ///
    /// Returns how long the script itself took.
    async fn apply_script(&self, script: &ScriptUnit) -> Result<Duration>;

    /// Release the connection
    async fn close(&self) {}
}

/// SQL executor for running upgrade scripts
pub struct SqlExecutor {
    connection: DatabaseConnection,
    ledger: Ledger,
}

impl SqlExecutor {
    /// Create a new SQL executor
    pub fn new(connection: DatabaseConnection, ledger: Ledger) -> Self {
        Self { connection, ledger }
    }

    /// Ensure the target database exists, then connect to it
    pub async fn open(config: &DatabaseConfig, execution: &ExecutionConfig) -> Result<Self> {
        if DatabaseConnection::ensure_database(config).await? {
            tracing::info!(database = %config.name, "Created database");
        }

        let connection = DatabaseConnection::connect(config).await?;
        Ok(Self::new(connection, Ledger::new(&execution.history_table)))
    }

    /// Get database connection
    pub fn get_connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

#[async_trait]
impl MigrationTarget for SqlExecutor {
    async fn ensure_ledger(&self) -> Result<()> {
        self.ledger.ensure(&self.connection).await
    }

    async fn applied_scripts(&self) -> Result<AppliedScripts> {
        self.ledger.applied_scripts(&self.connection).await
    }

    async fn apply_script(&self, script: &ScriptUnit) -> Result<Duration> {
        let execution_error = |e: sqlx::Error| Error::ExecutionError {
            script: script.name.clone(),
            message: database_message(&e),
        };

        // Dropping the transaction before commit rolls it back, which is what
        // happens when the runner's timeout cancels this future.
        with_pool!(&self.connection, pool => {
            let mut tx = pool.begin().await?;

            let started = Instant::now();
            (&mut *tx)
                .execute(sqlx::raw_sql(&script.contents))
                .await
                .map_err(execution_error)?;
            let elapsed = started.elapsed();

            self.ledger
                .record_applied((&mut *tx).into(), script, Utc::now(), elapsed)
                .await?;

            tx.commit().await.map_err(execution_error)?;
            Ok(elapsed)
        })
    }

    async fn close(&self) {
        self.connection.close().await;
    }
}

/// The database's own wording of an error, without sqlx's prefix
fn database_message(error: &sqlx::Error) -> String {
    match error {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    }
}
