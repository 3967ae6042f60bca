use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Binary running inside an empty directory so no stray config file is picked up.
fn execq(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("execq").expect("binary built");
    cmd.current_dir(dir.path())
        .env_remove("EXECQ_POLICY")
        .env_remove("EXECQ_TIMEOUT_MS")
        .env_remove("EXECQ_INTERPRETER")
        .env("EXECQ_LOG_LEVEL", "error");
    cmd
}

fn shell_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("execq.toml");
    fs::write(
        &path,
        r#"
[primitive]
interpreter = "sh"
args = ["-c"]

[storage]
backend = "memory"
"#,
    )
    .expect("config written");
    path
}

#[test]
fn classify_prints_json_classification() {
    let dir = TempDir::new().unwrap();
    execq(&dir)
        .args(["classify", "--name", "ReferenceError", "foo is not defined"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"undefined-reference\""))
        .stdout(predicate::str::contains("\"retryable\": true"));
}

#[test]
fn policies_lists_the_catalogue_and_marks_current() {
    let dir = TempDir::new().unwrap();
    execq(&dir)
        .args(["--policy", "aggressive", "policies"])
        .assert()
        .success()
        .stdout(predicate::str::contains("conservative"))
        .stdout(predicate::str::contains("network"))
        .stdout(predicate::str::is_match(r"\* aggressive").unwrap());
}

#[test]
fn unknown_policy_is_rejected_before_running() {
    let dir = TempDir::new().unwrap();
    execq(&dir)
        .args(["--policy", "reckless", "policies"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reckless"));
}

#[test]
fn config_example_is_toml() {
    let dir = TempDir::new().unwrap();
    execq(&dir)
        .args(["config", "--example"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[engine]"))
        .stdout(predicate::str::contains("current_policy = \"default\""));
}

#[test]
fn config_can_be_written_to_a_file() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out").join("execq.json");
    execq(&dir)
        .args(["config", "--output"])
        .arg(&output)
        .assert()
        .success();

    let written = fs::read_to_string(&output).unwrap();
    assert!(written.contains("\"current_policy\": \"default\""));

    execq(&dir)
        .args(["config", "--output"])
        .arg(&output)
        .assert()
        .failure();
}

#[test]
fn missing_explicit_config_fails() {
    let dir = TempDir::new().unwrap();
    execq(&dir)
        .args(["--config", "nope.toml", "policies"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[cfg(unix)]
#[test]
fn run_prints_outcomes_and_summary() {
    let dir = TempDir::new().unwrap();
    let config = shell_config(&dir);
    execq(&dir)
        .arg("--config")
        .arg(&config)
        .args(["run", "--code", "echo 7", "--code", "echo ok"])
        .assert()
        .success()
        .stdout(predicate::str::contains("= 7"))
        .stdout(predicate::str::contains("total 2"));
}

#[cfg(unix)]
#[test]
fn run_reports_classified_failures_with_exit_code() {
    let dir = TempDir::new().unwrap();
    let config = shell_config(&dir);
    execq(&dir)
        .arg("--config")
        .arg(&config)
        .args(["run", "--code", "echo 'SyntaxError: Unexpected token' >&2; exit 1"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("SyntaxError: Unexpected token"))
        .stdout(predicate::str::contains("syntax"));
}

#[cfg(unix)]
#[test]
fn run_reads_snippets_from_files() {
    let dir = TempDir::new().unwrap();
    let config = shell_config(&dir);
    let snippet = dir.path().join("snippet.sh");
    fs::write(&snippet, "echo from-file").unwrap();

    execq(&dir)
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg("--file")
        .arg(&snippet)
        .assert()
        .success()
        .stdout(predicate::str::contains("from-file"));
}

#[test]
fn entities_lists_every_kind() {
    let dir = TempDir::new().unwrap();
    execq(&dir)
        .env("EXECQ_DATA_DIR", dir.path().join("data"))
        .arg("entities")
        .assert()
        .success()
        .stdout(predicate::str::contains("task (0)"))
        .stdout(predicate::str::contains("vault (0)"));
}
