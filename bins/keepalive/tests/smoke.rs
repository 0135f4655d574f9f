use assert_cmd::Command;
use predicates::prelude::*;

fn bin(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("claude-keepalive").unwrap();
    // Keep test runs out of the real per-user config dir.
    cmd.env("HOME", home);
    cmd.env("XDG_CONFIG_HOME", home.join("xdg"));
    cmd
}

#[cfg(target_os = "linux")]
fn seed_config(home: &std::path::Path, json: &str) {
    let dir = home.join("xdg/claude-keepalive");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.json"), json).unwrap();
}

#[test]
fn help_lists_the_commands() {
    let dir = tempfile::tempdir().unwrap();
    bin(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("autostart"));
}

#[test]
fn status_reports_not_running() {
    let dir = tempfile::tempdir().unwrap();
    bin(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}

#[test]
fn stop_without_a_daemon_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    bin(dir.path())
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("no running daemon"));
}

#[test]
fn config_prints_the_stored_json() {
    let dir = tempfile::tempdir().unwrap();
    bin(dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("intervalHours"))
        .stdout(predicate::str::contains("claudeBin"));
}

#[test]
fn logs_work_before_any_daemon_ran() {
    let dir = tempfile::tempdir().unwrap();
    bin(dir.path())
        .arg("logs")
        .assert()
        .success()
        .stdout(predicate::str::contains("Log files:"));
}

#[cfg(target_os = "linux")]
#[test]
fn dry_run_prints_the_manual_schedule() {
    let dir = tempfile::tempdir().unwrap();
    seed_config(dir.path(), r#"{"claudeBin": "/bin/true"}"#);
    bin(dir.path())
        .args(["start", "--dry-run", "--from", "07:00", "--count", "3", "--interval", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("manual schedule, 3 firings"))
        .stdout(predicate::str::contains("07:00"));
}

#[cfg(target_os = "linux")]
#[test]
fn dry_run_previews_the_auto_cadence() {
    let dir = tempfile::tempdir().unwrap();
    seed_config(dir.path(), r#"{"claudeBin": "/bin/true"}"#);
    bin(dir.path())
        .args(["start", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("auto schedule, every 5h"))
        .stdout(predicate::str::contains("then every 5h until stopped"));
}

#[cfg(target_os = "linux")]
#[test]
fn start_rejects_out_of_range_flags() {
    let dir = tempfile::tempdir().unwrap();
    seed_config(dir.path(), r#"{"claudeBin": "/bin/true"}"#);
    bin(dir.path())
        .args(["start", "--dry-run", "--interval", "99"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("intervalHours must be 1..=24"));
}

#[cfg(target_os = "linux")]
#[test]
fn start_rejects_an_invalid_stored_config() {
    let dir = tempfile::tempdir().unwrap();
    seed_config(dir.path(), r#"{"claudeBin": "/bin/true", "startTime": "7am"}"#);
    // No flags: the hand-edited file alone must refuse the start, before
    // anything is spawned.
    bin(dir.path())
        .arg("start")
        .assert()
        .failure()
        .stdout(predicate::str::contains("startTime must be HH:MM"));
    assert!(!dir.path().join("xdg/claude-keepalive/keepalive.pid").exists());
}

#[cfg(target_os = "linux")]
#[test]
fn test_command_pings_the_configured_binary() {
    let dir = tempfile::tempdir().unwrap();
    seed_config(dir.path(), r#"{"claudeBin": "/bin/true"}"#);
    bin(dir.path())
        .arg("test")
        .assert()
        .success()
        .stdout(predicate::str::contains("ping answered"));
}

#[cfg(target_os = "linux")]
#[test]
fn start_refuses_while_the_marker_pid_is_live() {
    let dir = tempfile::tempdir().unwrap();
    seed_config(dir.path(), r#"{"claudeBin": "/bin/true"}"#);
    let cfgdir = dir.path().join("xdg/claude-keepalive");
    // The test runner itself stands in for a live daemon.
    let mine = std::process::id().to_string();
    std::fs::write(cfgdir.join("keepalive.pid"), &mine).unwrap();

    bin(dir.path())
        .args(["start", "--dry-run"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("already running"));
    assert_eq!(
        std::fs::read_to_string(cfgdir.join("keepalive.pid")).unwrap(),
        mine
    );
}

#[cfg(target_os = "linux")]
#[test]
fn stale_marker_is_reported_and_cleaned() {
    let dir = tempfile::tempdir().unwrap();
    let cfgdir = dir.path().join("xdg/claude-keepalive");
    std::fs::create_dir_all(&cfgdir).unwrap();
    std::fs::write(cfgdir.join("keepalive.pid"), "999999999").unwrap();

    bin(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("stale PID marker"));

    bin(dir.path())
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("stale marker"));
    assert!(!cfgdir.join("keepalive.pid").exists());
}
