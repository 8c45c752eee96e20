//! Upgrade audit log
//!
//! Every banner and script attempt becomes a [`LogEntry`] handed to a
//! [`LogSink`]. The file sink writes one plain-text file per run and mirrors
//! each line to the console.

use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Status column of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Started,
    Success,
    Skipped,
    Failed,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntryStatus::Started => "STARTED",
            EntryStatus::Success => "SUCCESS",
            EntryStatus::Skipped => "SKIPPED",
            EntryStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub database: String,
    /// Banner text, script name or preparation stage
    pub subject: String,
    pub status: EntryStatus,
    pub detail: Option<String>,
}

impl LogEntry {
    /// Marks the start of a database's run
    pub fn banner(database: &str) -> Self {
        Self {
            timestamp: Local::now(),
            database: database.to_string(),
            subject: format!("====== Upgrading {} ======", database),
            status: EntryStatus::Started,
            detail: None,
        }
    }

    pub fn new(
        database: &str,
        subject: impl Into<String>,
        status: EntryStatus,
        detail: Option<String>,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            database: database.to_string(),
            subject: subject.into(),
            status,
            detail,
        }
    }

    pub fn is_banner(&self) -> bool {
        self.status == EntryStatus::Started
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {} | {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.database,
            self.subject,
            self.status
        )?;
        if let Some(detail) = &self.detail {
            // One entry, one line
            let detail: Vec<&str> = detail
                .split(['\r', '\n'])
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect();
            write!(f, " | {}", detail.join(" "))?;
        }
        Ok(())
    }
}

/// Append-only destination for log entries.
///
/// Once `append` returns `Ok` the entry must not be lost.
pub trait LogSink: Send + Sync {
    fn append(&self, entry: &LogEntry) -> Result<()>;
}

/// Mirrors log lines to stdout, coloured by status
#[derive(Debug, Clone, Copy)]
pub struct ConsoleMirror {
    color: bool,
}

impl ConsoleMirror {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn print(&self, entry: &LogEntry) {
        let color = match entry.status {
            EntryStatus::Started => CYAN,
            EntryStatus::Success => GREEN,
            EntryStatus::Skipped => YELLOW,
            EntryStatus::Failed => RED,
        };
        self.print_line(&entry.to_string(), color);
    }

    /// Final line of a run
    pub fn print_summary(&self, success: bool) {
        if success {
            self.print_line("All databases upgraded successfully.", GREEN);
        } else {
            self.print_line(
                "Completed with errors across one or more databases. Check logs.",
                YELLOW,
            );
        }
    }

    fn print_line(&self, line: &str, color: &str) {
        if self.color {
            println!("{}{}{}", color, line, RESET);
        } else {
            println!("{}", line);
        }
    }
}

/// Writes one log file per run, flushing every entry to disk
pub struct FileLogSink {
    path: PathBuf,
    file: Mutex<File>,
    console: Option<ConsoleMirror>,
}

impl FileLogSink {
    /// Create a fresh log file in `directory`, named after the current time.
    ///
    /// When a file with that name exists already a numeric suffix is added,
    /// so two sinks never write to the same file.
    pub fn create(directory: impl AsRef<Path>, console: Option<ConsoleMirror>) -> Result<Self> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory).map_err(|e| {
            Error::LogWriteError(format!(
                "Failed to create log directory {}: {}",
                directory.display(),
                e
            ))
        })?;

        let stem = format!("UpgradeLog_{}", Local::now().format("%Y-%m-%d_%H-%M-%S"));
        let mut counter = 0;
        loop {
            let name = if counter == 0 {
                format!("{}.txt", stem)
            } else {
                format!("{}_{}.txt", stem, counter)
            };
            let path = directory.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    tracing::debug!(path = %path.display(), "Opened upgrade log");
                    return Ok(Self {
                        path,
                        file: Mutex::new(file),
                        console,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
                Err(e) => {
                    return Err(Error::LogWriteError(format!(
                        "Failed to create {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileLogSink {
    fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| Error::LogWriteError("Log file lock poisoned".to_string()))?;

        writeln!(file, "{}", entry)
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data())
            .map_err(|e| {
                Error::LogWriteError(format!("Failed to write {}: {}", self.path.display(), e))
            })?;

        if let Some(console) = &self.console {
            console.print(entry);
        }
        Ok(())
    }
}

/// Keeps entries in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, entry: &LogEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| Error::LogWriteError("Log buffer lock poisoned".to_string()))?
            .push(entry.clone());
        Ok(())
    }
}
