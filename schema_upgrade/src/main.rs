//! SchemaUpgrade CLI - applies SQL upgrade scripts to every configured database

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use schema_upgrade::{coordinator, ConsoleMirror, FileLogSink, RunSummary};

#[derive(Parser, Debug)]
#[command(name = "schema_upgrade", version, about = "Apply SQL upgrade scripts to databases")]
struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(
        short,
        long,
        env = "SCHEMA_UPGRADE_CONFIG",
        default_value = "schema_upgrade.toml"
    )]
    config: PathBuf,

    /// Directory for the upgrade log, overriding the configuration
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Per-script timeout in seconds, overriding the configuration
    #[arg(long)]
    timeout: Option<u64>,

    /// Disable coloured console output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(summary) => ExitCode::from(summary.exit_code()),
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary> {
    let config = schema_upgrade::init(&cli.config, |config| {
        if let Some(log_dir) = &cli.log_dir {
            config.execution.log_directory = log_dir.to_string_lossy().into_owned();
        }
        if let Some(timeout) = cli.timeout {
            config.execution.timeout_seconds = timeout;
        }
        if cli.no_color {
            config.execution.no_color = true;
        }
    })
    .with_context(|| format!("loading {}", cli.config.display()))?;

    let console = ConsoleMirror::new(!config.execution.no_color);
    let sink = FileLogSink::create(&config.execution.log_directory, Some(console))?;
    tracing::info!(path = %sink.path().display(), "Writing upgrade log");

    let summary = coordinator::run_from_config(&config, Arc::new(sink)).await?;
    console.print_summary(summary.is_success());

    Ok(summary)
}
