//! Configuration handling for SchemaUpgrade

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Drivers understood by [`crate::db::DatabaseConnection`]
pub const SUPPORTED_DRIVERS: &[&str] = &["postgres", "mysql", "sqlite"];

/// Load and validate configuration from a TOML, JSON or YAML file
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
    let config = read_from_file(path)?;
    config.validate()?;
    Ok(config)
}

/// Read configuration from a TOML, JSON or YAML file without validating it.
///
/// The format is picked from the file extension, anything unknown is read as
/// TOML. Relative script and log directories are resolved against the
/// directory holding the configuration file. Callers that adjust the result
/// must call [`Config::validate`] themselves.
pub fn read_from_file(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| {
        Error::ConfigError(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();

    let mut config = parse(&config_str, &extension)
        .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;

    if let Some(base) = path.parent() {
        config.resolve_relative_paths(base);
    }

    Ok(config)
}

fn parse(source: &str, extension: &str) -> Result<Config> {
    let config = match extension {
        "json" => serde_json::from_str(source)?,
        "yaml" | "yml" => serde_yaml::from_str(source)?,
        _ => toml::from_str(source)?,
    };
    Ok(config)
}

/// Represents the complete SchemaUpgrade configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Target databases, processed strictly in this order
    pub databases: Vec<DatabaseConfig>,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub scripts: ScriptDiscoveryConfig,
    pub logging: Option<LoggingConfig>,
}

/// One target database and where its scripts live
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub name: String,
    pub driver: String,
    pub url: String,
    pub script_path: String,
    /// Create the database itself when it does not exist yet
    #[serde(default)]
    pub create_if_missing: bool,
    pub pool_size: Option<u32>,
    pub connect_timeout_seconds: Option<u64>,
}

/// Script execution settings shared by every database
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Ceiling for a single script, in seconds
    pub timeout_seconds: u64,
    /// Name of the applied-script ledger table
    pub history_table: String,
    /// Directory receiving one audit log file per run
    pub log_directory: String,
    /// Disable ANSI colours on the console mirror
    pub no_color: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            history_table: "schema_versions".to_string(),
            log_directory: "AllDBLogs".to_string(),
            no_color: false,
        }
    }
}

/// How script files are discovered in a script directory
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ScriptDiscoveryConfig {
    pub include_subdirectories: bool,
    /// Regex a script name must match to be picked up
    pub filter: Option<String>,
    pub extension: String,
}

impl Default for ScriptDiscoveryConfig {
    fn default() -> Self {
        Self {
            include_subdirectories: false,
            filter: None,
            extension: "sql".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: String,
    pub stdout: bool,
}

impl Config {
    /// Check the configuration before anything touches a database
    pub fn validate(&self) -> Result<()> {
        if self.databases.is_empty() {
            return Err(Error::ConfigError(
                "At least one database must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for db in &self.databases {
            if db.name.trim().is_empty() {
                return Err(Error::ConfigError("Database name cannot be empty".to_string()));
            }
            if !seen.insert(db.name.as_str()) {
                return Err(Error::ConfigError(format!(
                    "Duplicate database name: {}",
                    db.name
                )));
            }
            if !SUPPORTED_DRIVERS.contains(&db.driver.as_str()) {
                return Err(Error::ConfigError(format!(
                    "Unsupported database driver for {}: {}",
                    db.name, db.driver
                )));
            }
            if db.url.trim().is_empty() {
                return Err(Error::ConfigError(format!(
                    "Connection url for {} cannot be empty",
                    db.name
                )));
            }
        }

        if self.execution.timeout_seconds == 0 {
            return Err(Error::ConfigError(
                "execution.timeout_seconds must be greater than zero".to_string(),
            ));
        }

        if !is_plain_identifier(&self.execution.history_table) {
            return Err(Error::ConfigError(format!(
                "Invalid history table name: {}",
                self.execution.history_table
            )));
        }

        if let Some(filter) = &self.scripts.filter {
            Regex::new(filter)
                .map_err(|e| Error::ConfigError(format!("Invalid script filter: {}", e)))?;
        }

        Ok(())
    }

    /// Anchor relative directories at `base`
    pub fn resolve_relative_paths(&mut self, base: &Path) {
        for db in &mut self.databases {
            db.script_path = resolve(base, &db.script_path);
        }
        self.execution.log_directory = resolve(base, &self.execution.log_directory);
    }
}

fn resolve(base: &Path, value: &str) -> String {
    let path = Path::new(value);
    if path.is_absolute() {
        value.to_string()
    } else {
        base.join(path).to_string_lossy().into_owned()
    }
}

/// Ledger table names are interpolated into DDL, so only plain identifiers pass
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
