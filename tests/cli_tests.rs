//! CLI surface tests

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_describes_the_tool() {
    Command::cargo_bin("rigger")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("provisioning"));
}

#[test]
fn units_lists_builtins() {
    Command::cargo_bin("rigger")
        .unwrap()
        .arg("units")
        .assert()
        .success()
        .stdout(predicate::str::contains("os-detect"))
        .stdout(predicate::str::contains("confirm-proceed"));
}

#[test]
fn run_requires_credentials() {
    Command::cargo_bin("rigger")
        .unwrap()
        .args(["run", "missing.yaml", "--host", "h", "--user", "u"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--key or --password"));
}

#[test]
fn run_fails_fast_on_unknown_unit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wf.yaml");
    std::fs::write(
        &path,
        "workflow:\n  name: bad\n  steps:\n    - unit_id: no-such-unit\n",
    )
    .unwrap();

    Command::cargo_bin("rigger")
        .unwrap()
        .args([
            "run",
            path.to_str().unwrap(),
            "--host",
            "h",
            "--user",
            "u",
            "--password",
            "p",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no-such-unit"));
}

#[test]
fn run_reports_unreadable_workflow() {
    Command::cargo_bin("rigger")
        .unwrap()
        .args([
            "run",
            "definitely-not-here.yaml",
            "--host",
            "h",
            "--user",
            "u",
            "--password",
            "p",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("definitely-not-here.yaml"));
}
