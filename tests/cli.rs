use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn holocron(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("holocron").unwrap();
    cmd.current_dir(dir)
        .env_remove("HOLOCRON_CONFIG")
        .env("RUST_LOG", "holocron=warn");
    cmd
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("holocron.yaml");
    let yaml = format!("paths:\n  data_dir: {}\n", dir.join("data").display());
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn help_lists_the_stages() {
    let dir = TempDir::new().unwrap();
    holocron(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("narrate"))
        .stdout(predicate::str::contains("publish"));
}

#[test]
fn config_show_prints_settings() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    holocron(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Current Configuration:"))
        .stdout(predicate::str::contains("1080x1920 @ 30 fps"));
}

#[test]
fn config_writes_default_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("nested").join("holocron.yaml");

    holocron(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration written to"));

    let written = std::fs::read_to_string(&config).unwrap();
    assert!(written.contains("word_limit"));
}

#[test]
fn status_on_empty_workspace() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    holocron(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No jobs yet."));
}

#[test]
fn invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("holocron.yaml");
    std::fs::write(&config, "retry:\n  max_attempts: 0\n").unwrap();

    holocron(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_attempts"));
}

#[test]
fn narrate_unknown_job_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    holocron(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["narrate", "No_Such_Article"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No_Such_Article"));
}

#[test]
fn align_with_no_pending_job_is_exhausted() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    holocron(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("align")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no unfinished job"));
}

#[test]
fn narrate_rejects_job_outside_workspace() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    holocron(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["narrate", "../../etc"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("../../etc"));
}
