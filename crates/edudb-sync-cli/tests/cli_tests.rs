use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn cmd() -> Command {
    Command::cargo_bin("edudb-sync").unwrap()
}

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

// Hosts under .invalid never resolve; these configs are only used by tests
// that fail before any connection is attempted.
const VALID_CONFIG: &str = r#"
source:
  host: sync-source.invalid
  database: edudb
  user: app
  password: x
destination:
  host: sync-dest.invalid
  database: edudb
  user: app
  password: x
"#;

const SELF_SYNC_CONFIG: &str = r#"
source:
  host: db.invalid
  database: edudb
  user: app
  password: x
destination:
  host: db.invalid
  database: edudb
  user: app
  password: x
"#;

#[test]
fn test_help_lists_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_help_shows_global_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("config.yaml"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_version() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("edudb-sync"));
}

#[test]
fn test_sync_help_documents_mode_fallback() {
    cmd()
        .args(["sync", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--mode"))
        .stdout(predicate::str::contains("sync.mode"))
        .stdout(predicate::str::contains("[default: upsert-overwrite]").not());
}

#[test]
fn test_missing_config_file_exits_7() {
    cmd()
        .args(["--config", "/nonexistent/edudb.yaml", "sync"])
        .assert()
        .code(7);
}

#[test]
fn test_unparseable_config_exits_1() {
    let config = write_config("{{{{ not yaml");
    cmd()
        .args(["--config", config.path().to_str().unwrap(), "sync"])
        .assert()
        .code(1);
}

#[test]
fn test_config_missing_destination_exits_1() {
    let config = write_config("source:\n  host: h\n  database: d\n  user: u\n");
    cmd()
        .args(["--config", config.path().to_str().unwrap(), "sync"])
        .assert()
        .code(1);
}

#[test]
fn test_config_with_bad_ssl_mode_exits_1() {
    let yaml = VALID_CONFIG.replace("password: x", "password: x\n  ssl_mode: prefer");
    let config = write_config(&yaml);
    cmd()
        .args(["--config", config.path().to_str().unwrap(), "sync"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ssl_mode"));
}

#[test]
fn test_unknown_transfer_mode_exits_1() {
    let config = write_config(VALID_CONFIG);
    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "sync",
            "--mode",
            "merge",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown transfer mode"));
}

#[test]
fn test_config_transfer_mode_is_validated() {
    let yaml = format!("{}sync:\n  mode: merge\n", VALID_CONFIG);
    let config = write_config(&yaml);
    cmd()
        .args(["--config", config.path().to_str().unwrap(), "sync"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("insert_if_absent"));
}

#[test]
fn test_mode_flag_overrides_config_mode() {
    // A bad flag value fails even though the config carries a valid mode,
    // so the flag is the one being honored.
    let yaml = format!("{}sync:\n  mode: insert_if_absent\n", VALID_CONFIG);
    let config = write_config(&yaml);
    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "sync",
            "--mode",
            "merge",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown transfer mode"));
}

#[test]
fn test_sync_into_itself_exits_3() {
    let config = write_config(SELF_SYNC_CONFIG);
    cmd()
        .args(["--config", config.path().to_str().unwrap(), "sync"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("refusing to sync into itself"));
}

#[test]
fn test_import_requires_input_flag() {
    let config = write_config(VALID_CONFIG);
    cmd()
        .args(["--config", config.path().to_str().unwrap(), "import"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--input <INPUT>"));
}

#[test]
fn test_import_with_missing_snapshot_exits_7() {
    let config = write_config(VALID_CONFIG);
    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "import",
            "--input",
            "/nonexistent/snapshot.json",
        ])
        .assert()
        .code(7);
}

#[test]
fn test_import_with_malformed_snapshot_exits_1() {
    let config = write_config(VALID_CONFIG);
    let mut snapshot = NamedTempFile::new().unwrap();
    snapshot.write_all(b"[1, 2, 3]").unwrap();
    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "import",
            "--input",
            snapshot.path().to_str().unwrap(),
        ])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_verbosity_exits_1() {
    let config = write_config(VALID_CONFIG);
    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "--verbosity",
            "loud",
            "sync",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown verbosity"));
}
