//! Tests for `src/pidfile.rs`.

use ifguard::pidfile::{is_alive, read_live_pid, PidFile, PidFileError};

fn own_pid() -> i32 {
    i32::try_from(std::process::id()).expect("pid fits i32")
}

#[test]
fn acquire_writes_pid_and_drop_removes_it() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("ifguard.pid");

    {
        let pid_file = PidFile::acquire(&path).expect("should acquire");
        assert_eq!(pid_file.path(), path.as_path());
        let contents = std::fs::read_to_string(&path).expect("should read");
        assert_eq!(contents.trim(), std::process::id().to_string());
        assert_eq!(read_live_pid(&path), Some(own_pid()));
    }

    assert!(!path.exists());
}

#[test]
fn live_foreign_pid_refuses() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("ifguard.pid");
    // pid 1 always exists.
    std::fs::write(&path, "1\n").expect("should write");

    match PidFile::acquire(&path) {
        Err(PidFileError::AlreadyRunning(pid)) => assert_eq!(pid, 1),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    assert!(path.exists(), "refusal must not remove the other daemon's file");
}

#[test]
fn stale_and_garbled_files_are_replaced() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("ifguard.pid");

    for stale in ["2147483646\n", "garbage", "", "-5"] {
        std::fs::write(&path, stale).expect("should write");
        let pid_file = PidFile::acquire(&path).expect("stale file should be replaced");
        assert_eq!(read_live_pid(pid_file.path()), Some(own_pid()));
    }
}

#[test]
fn liveness() {
    assert!(is_alive(own_pid()));
    assert!(!is_alive(2_147_483_646));
}
