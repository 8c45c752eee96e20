//! Error types for SchemaUpgrade

use thiserror::Error;

/// Result type for SchemaUpgrade operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for SchemaUpgrade
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Script source not found: {0}")]
    ScriptNotFound(String),

    #[error("Script discovery error: {0}")]
    DiscoveryError(String),

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("Execution of {script} failed: {message}")]
    ExecutionError { script: String, message: String },

    #[error("Log write error: {0}")]
    LogWriteError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Message attached to a failed log entry.
    ///
    /// Execution errors carry the script name in their own log column, so only
    /// the database's message is kept.
    pub fn detail(&self) -> String {
        match self {
            Error::ExecutionError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the error must abort the whole process rather than one database
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::LogWriteError(_))
    }
}

/// Convert Serde JSON errors to SchemaUpgrade errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert YAML errors to SchemaUpgrade errors
impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert TOML deserialization errors to SchemaUpgrade errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}
