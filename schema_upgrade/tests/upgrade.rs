//! End-to-end upgrade runs against SQLite databases

use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

use schema_upgrade::{
    config, jobs_from_config, run_from_config, Config, DatabaseConfig, DatabaseConnection,
    DatabaseJob, DatabaseOutcome, EmbeddedScriptProvider, EntryStatus, ExecutionConfig,
    FailurePoint, FileLogSink, Ledger, LogSink, MemoryLogSink, RunCoordinator, ScriptDiscoveryConfig,
    Stage,
};

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A database config whose scripts live in `<workspace>/<name>_scripts`
    fn database(&self, name: &str, scripts: &[(&str, &str)]) -> DatabaseConfig {
        let script_dir = self.path().join(format!("{}_scripts", name));
        fs::create_dir_all(&script_dir).unwrap();
        for (file, sql) in scripts {
            fs::write(script_dir.join(file), sql).unwrap();
        }

        DatabaseConfig {
            name: name.to_string(),
            driver: "sqlite".to_string(),
            url: format!("sqlite://{}", self.path().join(format!("{}.db", name)).display()),
            script_path: script_dir.to_string_lossy().into_owned(),
            create_if_missing: true,
            pool_size: Some(1),
            connect_timeout_seconds: Some(5),
        }
    }

    fn config(&self, databases: Vec<DatabaseConfig>) -> Config {
        Config {
            databases,
            execution: ExecutionConfig {
                timeout_seconds: 30,
                log_directory: self.path().join("AllDBLogs").to_string_lossy().into_owned(),
                no_color: true,
                ..ExecutionConfig::default()
            },
            scripts: ScriptDiscoveryConfig::default(),
            logging: None,
        }
    }
}

async fn applied(db: &DatabaseConfig) -> Vec<String> {
    let conn = DatabaseConnection::connect(db).await.unwrap();
    let names = Ledger::new("schema_versions")
        .applied_scripts(&conn)
        .await
        .unwrap()
        .into_keys()
        .collect();
    conn.close().await;
    names
}

async fn table_exists(db: &DatabaseConfig, table: &str) -> bool {
    let conn = DatabaseConnection::connect(db).await.unwrap();
    let DatabaseConnection::Sqlite(pool) = &conn else {
        panic!("expected sqlite");
    };
    let found: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await
            .unwrap();
    conn.close().await;
    found.is_some()
}

fn log_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_one_failing_database_does_not_stop_the_others() {
    let ws = Workspace::new();
    let a = ws.database(
        "A",
        &[
            ("001_init.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);"),
            ("002_seed.sql", "INSERT INTO users VALUES (1, 'alice');"),
        ],
    );
    let b = ws.database(
        "B",
        &[(
            "001_init.sql",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);
             INSERT INTO users VALUES (1);
             INSERT INTO users VALUES (1);",
        )],
    );
    let config = ws.config(vec![a.clone(), b.clone()]);
    let sink = Arc::new(FileLogSink::create(&config.execution.log_directory, None).unwrap());

    let summary = run_from_config(&config, sink.clone()).await.unwrap();

    assert_eq!(
        summary.outcome("A"),
        Some(&DatabaseOutcome::Success { applied: 2, skipped: 0 })
    );
    assert!(!summary.outcome("B").unwrap().is_success());
    assert_eq!(summary.exit_code(), 255);

    let lines = log_lines(sink.path());
    assert_eq!(lines.len(), 5, "{:#?}", lines);
    assert!(lines[0].contains("| A | ====== Upgrading A ====== | STARTED"));
    assert!(lines[1].ends_with("| A | 001_init.sql | SUCCESS"));
    assert!(lines[2].ends_with("| A | 002_seed.sql | SUCCESS"));
    assert!(lines[3].contains("| B | ====== Upgrading B ====== | STARTED"));
    assert!(lines[4].contains("| B | 001_init.sql | FAILED | "));
    assert!(lines[4].contains("UNIQUE constraint failed"), "{}", lines[4]);

    assert_eq!(applied(&a).await, vec!["001_init.sql", "002_seed.sql"]);
    assert!(applied(&b).await.is_empty());
    assert!(!table_exists(&b, "users").await);
}

#[tokio::test]
async fn test_rerun_skips_applied_scripts() {
    let ws = Workspace::new();
    let db = ws.database(
        "app",
        &[
            ("001_init.sql", "CREATE TABLE items (id INTEGER PRIMARY KEY);"),
            ("002_seed.sql", "INSERT INTO items VALUES (1);"),
        ],
    );
    let config = ws.config(vec![db.clone()]);

    let summary = run_from_config(&config, Arc::new(MemoryLogSink::new()))
        .await
        .unwrap();
    assert!(summary.is_success());

    let second = Arc::new(MemoryLogSink::new());
    let summary = run_from_config(&config, second.clone()).await.unwrap();

    assert_eq!(
        summary.outcome("app"),
        Some(&DatabaseOutcome::Success { applied: 0, skipped: 2 })
    );
    let statuses: Vec<_> = second.entries().iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![EntryStatus::Started, EntryStatus::Skipped, EntryStatus::Skipped]
    );
    assert_eq!(applied(&db).await, vec!["001_init.sql", "002_seed.sql"]);
}

#[tokio::test]
async fn test_failure_keeps_earlier_scripts_and_skips_later_ones() {
    let ws = Workspace::new();
    let db = ws.database(
        "app",
        &[
            ("001_init.sql", "CREATE TABLE a (id INTEGER);"),
            ("002_broken.sql", "CREATE TABLE b (id INTEGER); INSERT INTO missing VALUES (1);"),
            ("003_later.sql", "CREATE TABLE c (id INTEGER);"),
        ],
    );
    let config = ws.config(vec![db.clone()]);
    let sink = Arc::new(MemoryLogSink::new());

    let summary = run_from_config(&config, sink.clone()).await.unwrap();

    match summary.outcome("app") {
        Some(DatabaseOutcome::Failed { at, reason, applied }) => {
            assert_eq!(
                at,
                &FailurePoint::Script {
                    index: 1,
                    name: "002_broken.sql".to_string()
                }
            );
            assert!(reason.contains("no such table: missing"), "{}", reason);
            assert_eq!(*applied, 1);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let subjects: Vec<_> = sink.entries().into_iter().skip(1).map(|e| e.subject).collect();
    assert_eq!(subjects, vec!["001_init.sql", "002_broken.sql"]);
    assert_eq!(applied(&db).await, vec!["001_init.sql"]);
    assert!(table_exists(&db, "a").await);
    assert!(!table_exists(&db, "b").await);
    assert!(!table_exists(&db, "c").await);
}

#[tokio::test]
async fn test_empty_script_directory_logs_only_banner() {
    let ws = Workspace::new();
    let db = ws.database("empty", &[]);
    let config = ws.config(vec![db]);
    let sink = Arc::new(MemoryLogSink::new());

    let summary = run_from_config(&config, sink.clone()).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(sink.entries().len(), 1);
    assert!(sink.entries()[0].is_banner());
}

#[tokio::test]
async fn test_preparation_failures_are_per_database() {
    let ws = Workspace::new();
    let mut unreachable = ws.database("unreachable", &[("001.sql", "SELECT 1;")]);
    unreachable.create_if_missing = false;
    let mut no_scripts = ws.database("no_scripts", &[]);
    no_scripts.script_path = ws.path().join("missing").to_string_lossy().into_owned();
    let healthy = ws.database("healthy", &[("001.sql", "CREATE TABLE t (id INTEGER);")]);
    let config = ws.config(vec![unreachable, no_scripts, healthy]);
    let sink = Arc::new(MemoryLogSink::new());

    let summary = run_from_config(&config, sink.clone()).await.unwrap();

    assert!(matches!(
        summary.outcome("unreachable"),
        Some(DatabaseOutcome::Failed { at: FailurePoint::Stage(Stage::Connect), .. })
    ));
    assert!(matches!(
        summary.outcome("no_scripts"),
        Some(DatabaseOutcome::Failed { at: FailurePoint::Stage(Stage::Discover), .. })
    ));
    assert!(summary.outcome("healthy").unwrap().is_success());

    let failed: Vec<_> = sink
        .entries()
        .into_iter()
        .filter(|e| e.status == EntryStatus::Failed)
        .map(|e| (e.database, e.subject))
        .collect();
    assert_eq!(
        failed,
        vec![
            ("unreachable".to_string(), "[connect]".to_string()),
            ("no_scripts".to_string(), "[discover]".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_embedded_scripts_through_coordinator() {
    let ws = Workspace::new();
    let db = ws.database("embedded", &[]);
    let scripts = EmbeddedScriptProvider::from_pairs([
        ("002_seed.sql", "INSERT INTO kv VALUES ('a', '1');"),
        ("001_init.sql", "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT);"),
    ]);
    let sink: Arc<dyn LogSink> = Arc::new(MemoryLogSink::new());
    let coordinator = RunCoordinator::new(ExecutionConfig::default(), sink);

    let summary = coordinator
        .run(vec![DatabaseJob::new(db.clone(), Box::new(scripts))])
        .await
        .unwrap();

    assert!(summary.is_success());
    assert_eq!(applied(&db).await, vec!["001_init.sql", "002_seed.sql"]);
}

#[tokio::test]
async fn test_config_file_drives_a_run() {
    let ws = Workspace::new();
    let scripts = ws.path().join("Scripts");
    fs::create_dir_all(&scripts).unwrap();
    fs::write(scripts.join("001_init.sql"), "CREATE TABLE t (id INTEGER);").unwrap();
    fs::write(scripts.join("notes.sql"), "this is not sql").unwrap();

    let db_path: PathBuf = ws.path().join("testdb1.db");
    let config_path = ws.path().join("schema_upgrade.toml");
    fs::write(
        &config_path,
        format!(
            r#"
            [[databases]]
            name = "testDB"
            driver = "sqlite"
            url = "sqlite://{}"
            script_path = "Scripts"
            create_if_missing = true

            [execution]
            history_table = "applied_scripts"

            [scripts]
            filter = '^\d+_'
            "#,
            db_path.display()
        ),
    )
    .unwrap();

    let config = config::load_from_file(&config_path).unwrap();
    assert_eq!(jobs_from_config(&config).unwrap().len(), 1);

    let sink = Arc::new(MemoryLogSink::new());
    let summary = run_from_config(&config, sink.clone()).await.unwrap();

    assert!(summary.is_success());
    let conn = DatabaseConnection::connect(&config.databases[0]).await.unwrap();
    let recorded = Ledger::new("applied_scripts").applied_scripts(&conn).await.unwrap();
    assert_eq!(recorded.keys().collect::<Vec<_>>(), vec!["001_init.sql"]);
    conn.close().await;
}
