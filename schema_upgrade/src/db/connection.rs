//! Database connection handling
//!
//! This module opens connection pools for the supported drivers and, when a
//! target asks for it, creates the target database before connecting.

use sqlx::{
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
    postgres::{PgConnectOptions, PgPoolOptions},
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Connection, MySql, MySqlConnection, PgConnection, Pool, Postgres, Sqlite, SqliteConnection,
};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Run `$body` with `$pool` bound to whichever pool the connection holds
macro_rules! with_pool {
    ($conn:expr, $pool:ident => $body:expr) => {
        match $conn {
            $crate::db::connection::DatabaseConnection::Postgres($pool) => $body,
            $crate::db::connection::DatabaseConnection::MySql($pool) => $body,
            $crate::db::connection::DatabaseConnection::Sqlite($pool) => $body,
        }
    };
}
pub(crate) use with_pool;

/// SQL flavour spoken by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

/// Enumeration of supported database types
#[derive(Debug, Clone)]
pub enum DatabaseConnection {
    Postgres(Pool<Postgres>),
    MySql(Pool<MySql>),
    Sqlite(Pool<Sqlite>),
}

/// The connection behind an open transaction, for any supported driver
pub enum TransactionConnection<'a> {
    Postgres(&'a mut PgConnection),
    MySql(&'a mut MySqlConnection),
    Sqlite(&'a mut SqliteConnection),
}

impl<'a> From<&'a mut PgConnection> for TransactionConnection<'a> {
    fn from(conn: &'a mut PgConnection) -> Self {
        TransactionConnection::Postgres(conn)
    }
}

impl<'a> From<&'a mut MySqlConnection> for TransactionConnection<'a> {
    fn from(conn: &'a mut MySqlConnection) -> Self {
        TransactionConnection::MySql(conn)
    }
}

impl<'a> From<&'a mut SqliteConnection> for TransactionConnection<'a> {
    fn from(conn: &'a mut SqliteConnection) -> Self {
        TransactionConnection::Sqlite(conn)
    }
}

impl DatabaseConnection {
    /// Create a new database connection from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool_size = config.pool_size.unwrap_or(5);
        let timeout = Duration::from_secs(config.connect_timeout_seconds.unwrap_or(30));

        match config.driver.as_str() {
            "postgres" => {
                let options = PgConnectOptions::from_str(&config.url)?;
                let pool = PgPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect_with(options)
                    .await?;

                Ok(DatabaseConnection::Postgres(pool))
            }
            "mysql" => {
                let options = MySqlConnectOptions::from_str(&config.url)?;
                let pool = MySqlPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect_with(options)
                    .await?;

                Ok(DatabaseConnection::MySql(pool))
            }
            "sqlite" => {
                let options = SqliteConnectOptions::from_str(&config.url)?
                    .create_if_missing(config.create_if_missing);
                let pool = SqlitePoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect_with(options)
                    .await?;

                Ok(DatabaseConnection::Sqlite(pool))
            }
            _ => Err(Error::DatabaseError(format!(
                "Unsupported database driver: {}",
                config.driver
            ))),
        }
    }

    /// Create the target database when the configuration allows it.
    ///
    /// Only the database itself is created, never any table. SQLite files are
    /// created by [`DatabaseConnection::connect`] through `create_if_missing`.
    /// Returns whether a database was created.
    pub async fn ensure_database(config: &DatabaseConfig) -> Result<bool> {
        if !config.create_if_missing {
            return Ok(false);
        }

        match config.driver.as_str() {
            "postgres" => {
                let options = PgConnectOptions::from_str(&config.url)?;
                let name = target_database(config, options.get_database())?;
                let mut conn = PgConnection::connect_with(&options.database("postgres")).await?;

                let exists: Option<i32> =
                    sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
                        .bind(&name)
                        .fetch_optional(&mut conn)
                        .await?;

                let created = if exists.is_none() {
                    let sql = format!("CREATE DATABASE \"{}\"", name.replace('"', "\"\""));
                    sqlx::raw_sql(&sql).execute(&mut conn).await?;
                    true
                } else {
                    false
                };

                conn.close().await?;
                Ok(created)
            }
            "mysql" => {
                let options = MySqlConnectOptions::from_str(&config.url)?;
                let name = target_database(config, options.get_database())?;
                let mut conn =
                    MySqlConnection::connect_with(&options.database("information_schema")).await?;

                let sql = format!(
                    "CREATE DATABASE IF NOT EXISTS `{}`",
                    name.replace('`', "``")
                );
                let result = sqlx::raw_sql(&sql).execute(&mut conn).await?;

                conn.close().await?;
                Ok(result.rows_affected() > 0)
            }
            "sqlite" => Ok(false),
            _ => Err(Error::DatabaseError(format!(
                "Unsupported database driver: {}",
                config.driver
            ))),
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            DatabaseConnection::Postgres(_) => Dialect::Postgres,
            DatabaseConnection::MySql(_) => Dialect::MySql,
            DatabaseConnection::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Execute one or more SQL statements outside of any transaction
    pub async fn execute(&self, sql: &str) -> Result<()> {
        with_pool!(self, pool => {
            sqlx::raw_sql(sql).execute(pool).await?;
        });
        Ok(())
    }

    /// Close the pool, waiting for checked out connections to come back
    pub async fn close(&self) {
        with_pool!(self, pool => pool.close().await)
    }
}

/// Name of the database a server url points at, as the driver reads it
fn target_database(config: &DatabaseConfig, database: Option<&str>) -> Result<String> {
    database
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::DatabaseError(format!(
                "Connection url for {} does not name a database",
                config.name
            ))
        })
}
