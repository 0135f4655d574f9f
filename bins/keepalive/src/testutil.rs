use std::fs;
use std::path::{Path, PathBuf};

use ka_core::cfg::Config;

/// Write an executable shell script into `dir` and return its path.
/// Stands in for the real CLI so tests control exit codes and timing.
pub fn fake_cli(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-claude");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Config pointed at a fake CLI. Callers tighten the budget or burst
/// fields as the test needs.
pub fn test_config(bin: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.claude_bin = bin.display().to_string();
    cfg
}
