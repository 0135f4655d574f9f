use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::cfg::{self, AppId};

const PID_FILE: &str = "keepalive.pid";

/// File-backed marker for the single running daemon instance: a plaintext
/// decimal PID. Read and remove fail open so a corrupt marker can never
/// block a fresh start.
#[derive(Clone, Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Marker stored at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Marker at its conventional location inside the app config dir.
    pub fn for_app(app: &AppId) -> Result<Self> {
        Ok(Self::new(cfg::config_dir(app)?.join(PID_FILE)))
    }

    /// Where the marker lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `pid`, overwriting any prior marker.
    pub fn save(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create marker dir {}", parent.display()))?;
        }
        fs::write(&self.path, pid.to_string())
            .with_context(|| format!("write {}", self.path.display()))
    }

    /// Last saved pid, or `None` when the marker is missing, unreadable,
    /// or not a number.
    pub fn read(&self) -> Option<u32> {
        let txt = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!("pid marker unreadable: {e}");
                }
                return None;
            }
        };
        match txt.trim().parse() {
            Ok(pid) => Some(pid),
            Err(_) => {
                warn!("pid marker corrupt: {:?}", txt.trim());
                None
            }
        }
    }

    /// Delete the marker; already-absent markers are fine.
    pub fn remove(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("pid marker remove failed: {e}");
            }
        }
    }
}

/// Removes the marker when dropped. The daemon holds one for its lifetime
/// so the marker goes away exactly once, on signal exit or normal return.
pub struct PidGuard {
    file: PidFile,
}

impl PidGuard {
    /// Save `pid` into `file` and guard its removal.
    pub fn register(file: PidFile, pid: u32) -> Result<Self> {
        file.save(pid)?;
        Ok(Self { file })
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        self.file.remove();
    }
}

/// True iff `pid` names a live, signalable process. Probes with the zero
/// signal, which never disturbs the target. "No such process" is a silent
/// `false`; any other probe error is logged and still `false`. Zero and
/// values past `i32::MAX` never name one process and are `false` without
/// probing.
#[cfg(unix)]
pub fn is_live(pid: u32) -> bool {
    // kill() addresses a process group for pid 0 and for anything that
    // wraps negative through pid_t; such a marker is corrupt, not live.
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(code) if code == libc::ESRCH => false,
        err => {
            warn!("pid {pid} liveness probe failed (errno {err:?})");
            false
        }
    }
}

/// Liveness probes are Unix-only; other targets report not-running.
#[cfg(not(unix))]
pub fn is_live(_pid: u32) -> bool {
    false
}

/// Ask `pid` to terminate (SIGTERM). Returns whether the request was
/// issued; never waits for the target to exit. Zero and values past
/// `i32::MAX` are refused outright: through kill they would signal a
/// whole process group.
#[cfg(unix)]
pub fn request_stop(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        warn!("refusing to signal out-of-range pid {pid}");
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(
            "terminate request to {pid} failed: {}",
            std::io::Error::last_os_error()
        );
    }
    rc == 0
}

/// Termination requests are Unix-only; other targets report failure.
#[cfg(not(unix))]
pub fn request_stop(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker_in(dir: &tempfile::TempDir) -> PidFile {
        PidFile::new(dir.path().join("keepalive.pid"))
    }

    #[test]
    fn save_read_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pf = marker_in(&dir);
        assert_eq!(pf.read(), None);
        pf.save(4242).unwrap();
        assert_eq!(pf.read(), Some(4242));
        pf.remove();
        assert_eq!(pf.read(), None);
    }

    #[test]
    fn save_overwrites_prior_marker() {
        let dir = tempfile::tempdir().unwrap();
        let pf = marker_in(&dir);
        pf.save(1).unwrap();
        pf.save(2).unwrap();
        assert_eq!(pf.read(), Some(2));
    }

    #[test]
    fn garbage_marker_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let pf = marker_in(&dir);
        fs::write(pf.path(), "not-a-pid\n").unwrap();
        assert_eq!(pf.read(), None);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pf = marker_in(&dir);
        pf.remove();
        pf.remove();
    }

    #[test]
    fn guard_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let pf = marker_in(&dir);
        {
            let _guard = PidGuard::register(pf.clone(), 77).unwrap();
            assert_eq!(pf.read(), Some(77));
        }
        assert_eq!(pf.read(), None);
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_live() {
        assert!(is_live(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn absent_process_is_not_live() {
        // Far above any kernel pid_max, so never allocated.
        assert!(!is_live(0x7fff_fff0));
    }

    #[cfg(unix)]
    #[test]
    fn pid_zero_is_not_live() {
        // kill(0, 0) would answer for the caller's own process group.
        assert!(!is_live(0));
    }

    #[cfg(unix)]
    #[test]
    fn wrapping_pid_is_not_live() {
        // Would reach kill() as -1 without the range check.
        assert!(!is_live(u32::MAX));
    }
}
