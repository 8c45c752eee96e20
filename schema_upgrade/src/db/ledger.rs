//! Applied-script ledger
//!
//! A table inside each target database recording every script that has been
//! applied successfully. A script whose name is present is never run again.

use chrono::{DateTime, Utc};
use sqlx::Executor;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::db::connection::{with_pool, DatabaseConnection, Dialect, TransactionConnection};
use crate::error::{Error, Result};
use crate::scripts::ScriptUnit;

/// Names of applied scripts mapped to the checksum recorded with them
pub type AppliedScripts = BTreeMap<String, Option<String>>;

/// The ledger table of one target database
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    /// `table` must already be a validated plain identifier
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Create the ledger table if it does not exist yet
    pub async fn ensure(&self, connection: &DatabaseConnection) -> Result<()> {
        let sql = self.create_table_sql(connection.dialect());
        connection
            .execute(&sql)
            .await
            .map_err(|e| Error::LedgerError(format!("Failed to create {}: {}", self.table, e)))?;

        tracing::debug!(table = %self.table, "Ledger table ready");
        Ok(())
    }

    /// Read every recorded script name
    pub async fn applied_scripts(&self, connection: &DatabaseConnection) -> Result<AppliedScripts> {
        let sql = self.select_sql();
        let rows: Vec<(String, Option<String>)> = with_pool!(connection, pool => {
            sqlx::query_as::<_, (String, Option<String>)>(&sql)
                .fetch_all(pool)
                .await
        })
        .map_err(|e| Error::LedgerError(format!("Failed to read {}: {}", self.table, e)))?;

        Ok(rows.into_iter().collect())
    }

    /// Insert the row for `script` inside the transaction that ran it
    pub async fn record_applied(
        &self,
        tx: TransactionConnection<'_>,
        script: &ScriptUnit,
        applied_at: DateTime<Utc>,
        execution_time: Duration,
    ) -> Result<()> {
        let checksum = script.checksum();
        let millis = i64::try_from(execution_time.as_millis()).unwrap_or(i64::MAX);

        macro_rules! insert {
            ($conn:expr, $dialect:expr) => {{
                let sql = self.insert_sql($dialect);
                let query = sqlx::query(&sql)
                    .bind(script.name.as_str())
                    .bind(checksum.as_str())
                    .bind(applied_at)
                    .bind(millis);
                $conn.execute(query).await.map(|_| ())
            }};
        }

        let result = match tx {
            TransactionConnection::Postgres(conn) => insert!(conn, Dialect::Postgres),
            TransactionConnection::MySql(conn) => insert!(conn, Dialect::MySql),
            TransactionConnection::Sqlite(conn) => insert!(conn, Dialect::Sqlite),
        };

        result.map_err(|e| {
            Error::LedgerError(format!("Failed to record {}: {}", script.name, e))
        })
    }

    pub async fn is_applied(&self, connection: &DatabaseConnection, script_name: &str) -> Result<bool> {
        Ok(self.applied_scripts(connection).await?.contains_key(script_name))
    }

    pub(crate) fn create_table_sql(&self, dialect: Dialect) -> String {
        let columns = match dialect {
            Dialect::Postgres => {
                "id SERIAL PRIMARY KEY,
            script_name VARCHAR(255) NOT NULL UNIQUE,
            checksum VARCHAR(32) NULL,
            applied_at TIMESTAMP WITH TIME ZONE NOT NULL,
            execution_time_ms BIGINT NULL"
            }
            Dialect::MySql => {
                "id INT AUTO_INCREMENT PRIMARY KEY,
            script_name VARCHAR(255) NOT NULL UNIQUE,
            checksum VARCHAR(32) NULL,
            applied_at TIMESTAMP(6) NOT NULL,
            execution_time_ms BIGINT NULL"
            }
            Dialect::Sqlite => {
                "id INTEGER PRIMARY KEY AUTOINCREMENT,
            script_name TEXT NOT NULL UNIQUE,
            checksum TEXT NULL,
            applied_at TEXT NOT NULL,
            execution_time_ms INTEGER NULL"
            }
        };

        format!(
            "CREATE TABLE IF NOT EXISTS {} (
            {}
        )",
            self.table, columns
        )
    }

    fn insert_sql(&self, dialect: Dialect) -> String {
        let values = match dialect {
            Dialect::Postgres => "$1, $2, $3, $4",
            Dialect::MySql | Dialect::Sqlite => "?, ?, ?, ?",
        };

        format!(
            "INSERT INTO {} (script_name, checksum, applied_at, execution_time_ms) VALUES ({})",
            self.table, values
        )
    }

    pub(crate) fn select_sql(&self) -> String {
        format!(
            "SELECT script_name, checksum FROM {} ORDER BY id",
            self.table
        )
    }
}
