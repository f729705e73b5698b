use std::process::Command;

use tempfile::tempdir;

#[test]
fn failures_exit_non_zero_with_error_prefix() {
    let temp = tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_arbor"))
        .env("ARBORRC", "/dev/null")
        .arg("--data")
        .arg(temp.path())
        .args(["done", "9"])
        .output()
        .expect("run arbor");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.lines().any(|line| line.starts_with("error: no task at 9")),
        "stderr was: {stderr}"
    );
}

#[test]
fn add_then_export_round_trips() {
    let temp = tempdir().expect("tempdir");
    let arbor = |args: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_arbor"))
            .env("ARBORRC", "/dev/null")
            .arg("--data")
            .arg(temp.path())
            .args(args)
            .output()
            .expect("run arbor")
    };

    assert!(arbor(&["add", "Buy milk"]).status.success());
    let export = arbor(&["export"]);
    assert!(export.status.success());
    let document: serde_json::Value =
        serde_json::from_slice(&export.stdout).expect("export is json");
    assert_eq!(document[0]["title"], "Buy milk");
}
