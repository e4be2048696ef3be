//! CLI contract tests against the built binary.

use std::path::Path;
use std::time::Duration;

use assert_cmd::Command;

fn ifguard(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ifguard").expect("binary should build");
    cmd.env("IFGUARD_HOME", home)
        .env("IFGUARD_PROBE", "/nonexistent/ifguard-probe")
        .env("IFGUARD_HELPER", "/nonexistent/ifguard-helper")
        .env_remove("IFGUARD_CONFIG_PATH")
        .env_remove("IFGUARD_INTERFACE")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().expect("should run");
    assert!(output.status.success(), "command failed: {output:?}");
    String::from_utf8(output.stdout).expect("utf-8 stdout")
}

#[test]
fn help_lists_subcommands() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let out = stdout_of(ifguard(tmp.path()).arg("--help"));
    for sub in ["run", "status", "block", "allow"] {
        assert!(out.contains(sub), "help should mention {sub}: {out}");
    }
}

#[test]
fn version_flag_prints_version() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let out = stdout_of(ifguard(tmp.path()).arg("--version"));
    assert!(out.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn status_reports_probe_failure_as_down() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let out = stdout_of(ifguard(tmp.path()).arg("status"));

    assert!(out.contains("interface: awdl0 (down)"), "{out}");
    assert!(out.contains("blocking:  off"), "{out}");
    assert!(out.contains("missing"), "{out}");
    assert!(out.contains("daemon:    not running"), "{out}");
}

#[test]
fn block_and_allow_persist_policy() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let state = tmp.path().join("state.json");

    let out = stdout_of(ifguard(tmp.path()).arg("block"));
    assert!(out.contains("blocking on"), "{out}");
    assert!(out.contains("no daemon running"), "{out}");
    let raw = std::fs::read_to_string(&state).expect("state.json written");
    assert!(raw.contains("\"blocking_enabled\": true"), "{raw}");

    stdout_of(ifguard(tmp.path()).arg("allow"));
    let raw = std::fs::read_to_string(&state).expect("state.json written");
    assert!(raw.contains("\"blocking_enabled\": false"), "{raw}");

    let out = stdout_of(ifguard(tmp.path()).arg("status"));
    assert!(out.contains("blocking:  off"), "{out}");
}

#[test]
fn run_rejects_invalid_interface_override() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = ifguard(tmp.path())
        .args(["run", "--interface", "this-name-is-too-long0"])
        .output()
        .expect("should run");
    assert!(!output.status.success());
}

#[test]
fn status_warns_about_unparseable_override() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = ifguard(tmp.path())
        .env("IFGUARD_RETRY_MS", "soon")
        .arg("status")
        .output()
        .expect("should run");
    assert!(output.status.success(), "command failed: {output:?}");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ignoring invalid env override"), "{stderr}");
}

#[test]
fn run_logs_startup_and_unparseable_override() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = ifguard(tmp.path())
        .env("IFGUARD_SETTLE_MS", "later")
        .args(["run", "--interface", "ifgnone9"])
        .timeout(Duration::from_secs(2))
        .output()
        .expect("should run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ignoring invalid env override"), "{stderr}");
    assert!(stderr.contains("ifguard starting"), "{stderr}");
}
