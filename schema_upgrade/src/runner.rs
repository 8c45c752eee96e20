//! Migration runner
//!
//! Brings one target database up to date: ensures the ledger, skips scripts
//! already recorded there and applies the rest in order, stopping at the first
//! failure. Every step is reported to the [`LogSink`].

use std::fmt;
use std::time::Duration;

use crate::audit::{EntryStatus, LogEntry, LogSink};
use crate::db::MigrationTarget;
use crate::error::{Error, Result};
use crate::scripts::{list_scripts, ScriptProvider, ScriptUnit};

/// Preparation steps that can fail before any script runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Ledger,
    Discover,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Connect => "[connect]",
            Stage::Ledger => "[ledger]",
            Stage::Discover => "[discover]",
        };
        f.write_str(label)
    }
}

/// Where a database's run stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePoint {
    Stage(Stage),
    /// `index` counts pending scripts, from zero
    Script { index: usize, name: String },
}

/// Result of one script attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Success,
    Failure(String),
    Skipped,
}

/// Terminal result of one database's run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseOutcome {
    Success {
        applied: usize,
        skipped: usize,
    },
    Failed {
        at: FailurePoint,
        reason: String,
        applied: usize,
    },
}

impl DatabaseOutcome {
    /// Whether every pending script was applied
    pub fn is_success(&self) -> bool {
        matches!(self, DatabaseOutcome::Success { .. })
    }
}

/// Where a [`MigrationRunner`] is in its run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Preparing,
    Applying(usize),
    Done(DatabaseOutcome),
}

/// Runs the pending scripts of a single database
pub struct MigrationRunner<'a> {
    database: &'a str,
    sink: &'a dyn LogSink,
    timeout: Duration,
    state: RunnerState,
    outcomes: Vec<(String, ScriptOutcome)>,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(database: &'a str, sink: &'a dyn LogSink, timeout: Duration) -> Self {
        Self {
            database,
            sink,
            timeout,
            state: RunnerState::Idle,
            outcomes: Vec::new(),
        }
    }

    pub fn state(&self) -> &RunnerState {
        &self.state
    }

    /// Every script attempt of this run, in order
    pub fn outcomes(&self) -> &[(String, ScriptOutcome)] {
        &self.outcomes
    }

    /// Apply every pending script of `provider` to `target`.
    ///
    /// Database and script errors end up in the returned outcome; `Err` is
    /// only returned when the log sink cannot persist an entry.
    pub async fn run(
        &mut self,
        target: &dyn MigrationTarget,
        provider: &dyn ScriptProvider,
    ) -> Result<DatabaseOutcome> {
        self.transition(RunnerState::Preparing);

        if let Err(e) = target.ensure_ledger().await {
            return self.fail(FailurePoint::Stage(Stage::Ledger), e, 0);
        }
        let applied = match target.applied_scripts().await {
            Ok(applied) => applied,
            Err(e) => return self.fail(FailurePoint::Stage(Stage::Ledger), e, 0),
        };
        let scripts = match list_scripts(provider) {
            Ok(scripts) => scripts,
            Err(e) => return self.fail(FailurePoint::Stage(Stage::Discover), e, 0),
        };

        let mut pending: Vec<ScriptUnit> = Vec::with_capacity(scripts.len());
        let mut skipped = 0;
        for script in scripts {
            match applied.get(&script.name) {
                Some(recorded) => {
                    if let Some(checksum) = recorded {
                        if *checksum != script.checksum() {
                            tracing::warn!(
                                database = self.database,
                                script = %script.name,
                                "Script changed since it was applied"
                            );
                        }
                    }
                    self.log(&script.name, EntryStatus::Skipped, None)?;
                    self.outcomes.push((script.name, ScriptOutcome::Skipped));
                    skipped += 1;
                }
                None => pending.push(script),
            }
        }

        tracing::info!(
            database = self.database,
            source = %provider.location(),
            pending = pending.len(),
            skipped,
            "Scripts to apply"
        );

        for (index, script) in pending.iter().enumerate() {
            self.transition(RunnerState::Applying(index));

            let result = match tokio::time::timeout(self.timeout, target.apply_script(script)).await {
                Ok(result) => result,
                Err(_) => Err(Error::ExecutionError {
                    script: script.name.clone(),
                    message: format!(
                        "Execution timed out after {} seconds",
                        self.timeout.as_secs_f64()
                    ),
                }),
            };

            match result {
                Ok(elapsed) => {
                    tracing::info!(
                        database = self.database,
                        script = %script.name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Script applied"
                    );
                    self.log(&script.name, EntryStatus::Success, None)?;
                    self.outcomes.push((script.name.clone(), ScriptOutcome::Success));
                }
                Err(e) => {
                    let at = FailurePoint::Script {
                        index,
                        name: script.name.clone(),
                    };
                    return self.fail(at, e, index);
                }
            }
        }

        let outcome = DatabaseOutcome::Success {
            applied: pending.len(),
            skipped,
        };
        self.transition(RunnerState::Done(outcome.clone()));
        Ok(outcome)
    }

    /// End the run before it started, e.g. when the database is unreachable
    pub fn abort(&mut self, stage: Stage, error: Error) -> Result<DatabaseOutcome> {
        self.fail(FailurePoint::Stage(stage), error, 0)
    }

    fn fail(&mut self, at: FailurePoint, error: Error, applied: usize) -> Result<DatabaseOutcome> {
        if error.is_fatal() {
            return Err(error);
        }

        let reason = error.detail();
        tracing::error!(database = self.database, error = %error, "Upgrade stopped");

        let subject = match &at {
            FailurePoint::Stage(stage) => stage.to_string(),
            FailurePoint::Script { name, .. } => {
                self.outcomes
                    .push((name.clone(), ScriptOutcome::Failure(reason.clone())));
                name.clone()
            }
        };
        self.log(&subject, EntryStatus::Failed, Some(reason.clone()))?;

        let outcome = DatabaseOutcome::Failed {
            at,
            reason,
            applied,
        };
        self.transition(RunnerState::Done(outcome.clone()));
        Ok(outcome)
    }

    fn log(&self, subject: &str, status: EntryStatus, detail: Option<String>) -> Result<()> {
        self.sink
            .append(&LogEntry::new(self.database, subject, status, detail))
    }

    fn transition(&mut self, next: RunnerState) {
        tracing::debug!(database = self.database, from = ?self.state, to = ?next, "Runner state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryLogSink;
    use crate::db::AppliedScripts;
    use crate::scripts::EmbeddedScriptProvider;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Records applied scripts in memory and fails on request
    #[derive(Default)]
    struct FakeTarget {
        applied: Mutex<AppliedScripts>,
        fail_on: Option<&'static str>,
        slow_on: Option<&'static str>,
        broken_ledger: bool,
    }

    #[async_trait]
    impl MigrationTarget for FakeTarget {
        async fn ensure_ledger(&self) -> Result<()> {
            if self.broken_ledger {
                return Err(Error::LedgerError("permission denied".to_string()));
            }
            Ok(())
        }

        async fn applied_scripts(&self) -> Result<AppliedScripts> {
            Ok(self.applied.lock().unwrap().clone())
        }

        async fn apply_script(&self, script: &ScriptUnit) -> Result<Duration> {
            if self.slow_on == Some(script.name.as_str()) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail_on == Some(script.name.as_str()) {
                return Err(Error::ExecutionError {
                    script: script.name.clone(),
                    message: "constraint violation".to_string(),
                });
            }
            self.applied
                .lock()
                .unwrap()
                .insert(script.name.clone(), Some(script.checksum()));
            Ok(Duration::from_millis(1))
        }
    }

    fn provider(names: &[&str]) -> EmbeddedScriptProvider {
        EmbeddedScriptProvider::from_pairs(names.iter().map(|n| (*n, "SELECT 1;")))
    }

    fn statuses(sink: &MemoryLogSink) -> Vec<(String, EntryStatus)> {
        sink.entries()
            .into_iter()
            .map(|e| (e.subject, e.status))
            .collect()
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let target = FakeTarget::default();
        let scripts = provider(&["002_seed.sql", "001_init.sql"]);
        let sink = MemoryLogSink::new();

        let first = MigrationRunner::new("A", &sink, Duration::from_secs(5))
            .run(&target, &scripts)
            .await
            .unwrap();
        let mut second_runner = MigrationRunner::new("A", &sink, Duration::from_secs(5));
        let second = second_runner.run(&target, &scripts).await.unwrap();

        assert_eq!(first, DatabaseOutcome::Success { applied: 2, skipped: 0 });
        assert_eq!(second, DatabaseOutcome::Success { applied: 0, skipped: 2 });
        assert_eq!(second_runner.state(), &RunnerState::Done(second.clone()));
        assert_eq!(
            statuses(&sink),
            vec![
                ("001_init.sql".to_string(), EntryStatus::Success),
                ("002_seed.sql".to_string(), EntryStatus::Success),
                ("001_init.sql".to_string(), EntryStatus::Skipped),
                ("002_seed.sql".to_string(), EntryStatus::Skipped),
            ]
        );
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let target = FakeTarget {
            fail_on: Some("002.sql"),
            ..FakeTarget::default()
        };
        let scripts = provider(&["001.sql", "002.sql", "003.sql"]);
        let sink = MemoryLogSink::new();
        let mut runner = MigrationRunner::new("B", &sink, Duration::from_secs(5));

        let outcome = runner.run(&target, &scripts).await.unwrap();

        assert_eq!(
            outcome,
            DatabaseOutcome::Failed {
                at: FailurePoint::Script {
                    index: 1,
                    name: "002.sql".to_string()
                },
                reason: "constraint violation".to_string(),
                applied: 1,
            }
        );
        assert_eq!(
            runner.outcomes(),
            &[
                ("001.sql".to_string(), ScriptOutcome::Success),
                (
                    "002.sql".to_string(),
                    ScriptOutcome::Failure("constraint violation".to_string())
                ),
            ]
        );
        let applied: Vec<_> = target.applied.lock().unwrap().keys().cloned().collect();
        assert_eq!(applied, vec!["001.sql".to_string()]);
        assert_eq!(sink.entries().len(), 2);
        assert_eq!(
            sink.entries()[1].detail.as_deref(),
            Some("constraint violation")
        );
    }

    #[tokio::test]
    async fn test_empty_script_set_succeeds() {
        let target = FakeTarget::default();
        let sink = MemoryLogSink::new();

        let outcome = MigrationRunner::new("A", &sink, Duration::from_secs(5))
            .run(&target, &provider(&[]))
            .await
            .unwrap();

        assert_eq!(outcome, DatabaseOutcome::Success { applied: 0, skipped: 0 });
        assert!(sink.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_an_execution_failure() {
        let target = FakeTarget {
            slow_on: Some("002.sql"),
            ..FakeTarget::default()
        };
        let sink = MemoryLogSink::new();

        let outcome = MigrationRunner::new("A", &sink, Duration::from_secs(2))
            .run(&target, &provider(&["001.sql", "002.sql", "003.sql"]))
            .await
            .unwrap();

        match outcome {
            DatabaseOutcome::Failed { at, reason, applied } => {
                assert_eq!(
                    at,
                    FailurePoint::Script {
                        index: 1,
                        name: "002.sql".to_string()
                    }
                );
                assert!(reason.contains("timed out after 2 seconds"), "{}", reason);
                assert_eq!(applied, 1);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!target.applied.lock().unwrap().contains_key("003.sql"));
    }

    #[tokio::test]
    async fn test_ledger_failure_is_fatal_for_database() {
        let target = FakeTarget {
            broken_ledger: true,
            ..FakeTarget::default()
        };
        let sink = MemoryLogSink::new();

        let outcome = MigrationRunner::new("A", &sink, Duration::from_secs(5))
            .run(&target, &provider(&["001.sql"]))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            DatabaseOutcome::Failed {
                at: FailurePoint::Stage(Stage::Ledger),
                ..
            }
        ));
        assert_eq!(
            statuses(&sink),
            vec![("[ledger]".to_string(), EntryStatus::Failed)]
        );
        assert!(target.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abort_logs_stage() {
        let sink = MemoryLogSink::new();
        let mut runner = MigrationRunner::new("A", &sink, Duration::from_secs(5));

        let outcome = runner
            .abort(Stage::Connect, Error::DatabaseError("connection refused".into()))
            .unwrap();

        assert!(!outcome.is_success());
        assert_eq!(
            sink.entries()[0].detail.as_deref(),
            Some("Database error: connection refused")
        );
    }
}
