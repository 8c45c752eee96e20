//! Logging utilities for SchemaUpgrade
//!
//! This module sets up `tracing` diagnostics. The audit log of script
//! attempts is separate, see [`crate::audit`].

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize logging based on configuration
///
/// Without a `[logging]` table only warnings and errors reach stderr, so the
/// console stays readable next to the audit mirror.
pub fn init_logging(config: &Option<LoggingConfig>) -> Result<()> {
    let config = match config {
        Some(cfg) => cfg,
        None => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter(Level::WARN))
                .with_writer(std::io::stderr)
                .finish();
            return install(subscriber);
        }
    };

    let filter = env_filter(parse_level(&config.level));
    let json = config.format.eq_ignore_ascii_case("json");

    if let Some(file_path) = &config.file {
        // Ensure directory exists
        if let Some(parent) = Path::new(file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(file_path)?;

        if json {
            install(
                fmt::Subscriber::builder()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(Mutex::new(file))
                    .finish(),
            )
        } else {
            install(
                fmt::Subscriber::builder()
                    .with_ansi(false)
                    .with_env_filter(filter)
                    .with_writer(Mutex::new(file))
                    .finish(),
            )
        }
    } else if config.stdout {
        if json {
            install(
                fmt::Subscriber::builder()
                    .json()
                    .with_env_filter(filter)
                    .finish(),
            )
        } else {
            install(fmt::Subscriber::builder().with_env_filter(filter).finish())
        }
    } else {
        install(
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish(),
        )
    }
}

/// Parse a level name, falling back to INFO
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// `RUST_LOG` wins over the configured level
fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("schema_upgrade={}", level)))
}

fn install<S>(subscriber: S) -> Result<()>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::ConfigError(format!("Failed to initialize logging: {}", e)))
}
