// tests/error_handling.rs

use std::io::Write;

use kit::config::load_and_validate;
use kit::dag::TaskCatalog;
use kit::errors::KitError;
use kit::select_tasks;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn test_full_document_loads() {
    let file = write_config(
        r#"
[config]
termination_grace_period_seconds = 5
restart_backoff_seconds = 1.0
max_restart_backoff_seconds = 8.0

[config.semaphores]
cpu = 2

[env]
RUST_LOG = "info"

[volume.data]
host_path = "./data"

[task.build]
command = ["cargo", "build"]
semaphore = "cpu"

[task.db]
command = ["postgres"]
ports = [5432]
mutex = "db"
liveness_probe = { tcp_socket = { port = 5432 } }
readiness_probe = { tcp_socket = { port = 5432 }, period_seconds = 1 }

[task.api]
command = ["./target/debug/api"]
args = ["--port", "8080"]
dependencies = ["build", "db"]
env = { RUST_LOG = "debug" }

[task.api.readiness_probe]
http_get = { port = 8080, path = "healthz" }
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.config.termination_grace_period_seconds, 5);
    assert_eq!(cfg.config.semaphores["cpu"], 2);
    assert_eq!(cfg.volume["data"].host_path, "./data");

    let catalog = TaskCatalog::from_config(&cfg).unwrap();
    let db = catalog.get("db").unwrap();
    assert!(db.is_service());

    // Only a readiness probe: still a job.
    let api = catalog.get("api").unwrap();
    assert!(!api.is_service());
    assert_eq!(api.command().env["RUST_LOG"], "debug");
    assert_eq!(
        api.readiness_probe().unwrap().action.url(),
        "http://localhost:8080/healthz"
    );
}

#[test]
fn test_dag_cycle_returns_structured_error() {
    let file = write_config(
        r#"
[task.A]
command = ["echo", "A"]
dependencies = ["B"]

[task.B]
command = ["echo", "B"]
dependencies = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(KitError::DagCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains('A') || msg.contains('B'));
        }
        Err(e) => panic!("Expected DagCycle error, got: {e:?}"),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_unknown_dependency_returns_config_error() {
    let file = write_config(
        r#"
[task.A]
command = ["echo", "A"]
dependencies = ["NonExistent"]
"#,
    );

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("unknown dependency 'NonExistent'"));
}

#[test]
fn test_undeclared_semaphore_is_rejected() {
    let file = write_config(
        r#"
[task.A]
command = ["echo"]
semaphore = "gpu"
"#,
    );

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, KitError::ConfigError(msg) if msg.contains("undeclared semaphore 'gpu'")));
}

#[test]
fn test_malformed_probes_are_rejected() {
    let cases = [
        ("{ initial_delay_seconds = 1 }", "exactly one"),
        (
            "{ tcp_socket = { port = 1 }, http_get = { port = 2 } }",
            "exactly one",
        ),
        ("{ tcp_socket = { port = 0 } }", "port must be >= 1"),
        (
            "{ tcp_socket = { port = 80 }, failure_threshold = 0 }",
            "threshold",
        ),
        ("{ tcp_socket = { port = 80 }, period_seconds = 0 }", "period_seconds"),
    ];

    for (probe, expected) in cases {
        let file = write_config(&format!(
            "[task.A]\ncommand = [\"echo\"]\nliveness_probe = {probe}\n"
        ));
        let err = load_and_validate(file.path()).unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("liveness_probe") && msg.contains(expected),
            "probe {probe}: unexpected error {msg}"
        );
    }
}

#[test]
fn test_empty_command_is_rejected() {
    let file = write_config("[task.A]\ncommand = []\n");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(err.to_string().contains("empty `command`"));
}

#[test]
fn test_unknown_field_is_a_toml_error() {
    let file = write_config("[task.A]\ncommand = [\"echo\"]\ncmd = \"echo\"\n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(KitError::TomlError(_))
    ));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_and_validate(dir.path().join("Kit.toml")).unwrap_err();
    assert!(matches!(err, KitError::IoError(_)));
}

#[test]
fn test_unknown_target_is_task_not_found() {
    let file = write_config("[task.A]\ncommand = [\"echo\"]\n");
    let cfg = load_and_validate(file.path()).unwrap();
    let catalog = TaskCatalog::from_config(&cfg).unwrap();

    let err = select_tasks(catalog, &["B".to_string()]).unwrap_err();
    assert!(matches!(err, KitError::TaskNotFound(name) if name == "B"));
}
