use std::process::Stdio;
use std::time::Instant;

use ka_core::cfg::Config;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Ways a single ping can fail.
#[derive(Debug, Error)]
pub enum PingError {
    /// The tool never launched.
    #[error("failed to launch {bin}: {source}")]
    SpawnFailed {
        /// Binary name or path as configured.
        bin: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The tool outlived its time budget and was killed.
    #[error("timed out after {0}ms")]
    Timeout(u64),
    /// The tool exited nonzero; carries its stderr when it said anything.
    #[error("{0}")]
    ExecutionFailed(String),
}

/// Run one keepalive ping: `<claude_bin> -p <prompt>`, stdin closed, both
/// output streams drained into debug logs, a hard `timeout_millis` budget.
/// The subprocess is killed and reaped when the budget expires.
pub async fn ping(cfg: &Config) -> Result<(), PingError> {
    debug!("spawning {} -p {:?}", cfg.claude_bin, cfg.prompt);
    let started = Instant::now();
    let mut child = Command::new(&cfg.claude_bin)
        .arg("-p")
        .arg(&cfg.prompt)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PingError::SpawnFailed { bin: cfg.claude_bin.clone(), source: e })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Drain both pipes while waiting so a chatty CLI cannot stall on a
    // full pipe buffer.
    let wait = async {
        let (status, _, err_text) =
            tokio::join!(child.wait(), drain("stdout", stdout), drain("stderr", stderr));
        (status, err_text)
    };

    let budget = Duration::from_millis(cfg.timeout_millis);
    let waited = timeout(budget, wait).await;
    let (status, err_text) = match waited {
        Ok(done) => done,
        Err(_) => {
            let _ = child.kill().await;
            return Err(PingError::Timeout(cfg.timeout_millis));
        }
    };

    let status = status
        .map_err(|e| PingError::ExecutionFailed(format!("could not await the CLI: {e}")))?;
    if !status.success() {
        let msg = err_text.trim();
        let msg = if msg.is_empty() {
            match status.code() {
                Some(code) => format!("exited with code {code}"),
                None => "killed by a signal".to_string(),
            }
        } else {
            msg.to_string()
        };
        return Err(PingError::ExecutionFailed(msg));
    }
    debug!("CLI replied in {:?}", started.elapsed());
    Ok(())
}

/// True when `bin --version` launches and exits 0 within a short wait.
pub async fn is_installed(bin: &str) -> bool {
    let probe = Command::new(bin)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();
    matches!(timeout(Duration::from_secs(10), probe).await, Ok(Ok(status)) if status.success())
}

async fn drain<R: AsyncRead + Unpin>(stream: &'static str, reader: Option<R>) -> String {
    let mut collected = String::new();
    let Some(reader) = reader else {
        return collected;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(stream, "{}", line);
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fake_cli, test_config};

    #[tokio::test]
    async fn zero_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_cli(dir.path(), "echo pong");
        let cfg = test_config(&bin);
        assert!(ping(&cfg).await.is_ok());
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_cli(dir.path(), "echo not logged in >&2; exit 3");
        let cfg = test_config(&bin);
        let err = ping(&cfg).await.unwrap_err();
        assert!(matches!(err, PingError::ExecutionFailed(_)));
        assert!(err.to_string().contains("not logged in"));
    }

    #[tokio::test]
    async fn silent_nonzero_exit_reports_the_code() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_cli(dir.path(), "exit 3");
        let cfg = test_config(&bin);
        let err = ping(&cfg).await.unwrap_err();
        assert_eq!(err.to_string(), "exited with code 3");
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_failure() {
        let mut cfg = Config::default();
        cfg.claude_bin = "/definitely/not/a/real/cli".into();
        let err = ping(&cfg).await.unwrap_err();
        assert!(matches!(err, PingError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn overrunning_cli_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let pid_capture = dir.path().join("pid");
        // exec keeps the recorded pid for the sleep itself.
        let bin = fake_cli(
            dir.path(),
            &format!("echo $$ > {}; exec sleep 30", pid_capture.display()),
        );
        let mut cfg = test_config(&bin);
        cfg.timeout_millis = 200;
        let started = Instant::now();
        let err = ping(&cfg).await.unwrap_err();
        assert!(matches!(err, PingError::Timeout(200)));
        assert!(started.elapsed() < Duration::from_secs(5));

        // The kill is awaited before the timeout error returns, so the
        // subprocess must already be gone, not merely signaled.
        let pid: u32 = std::fs::read_to_string(&pid_capture)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(!ka_core::pidfile::is_live(pid));
    }

    #[tokio::test]
    async fn prompt_reaches_the_cli() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("argv");
        let bin = fake_cli(
            dir.path(),
            &format!("printf '%s %s' \"$1\" \"$2\" > {}", capture.display()),
        );
        let mut cfg = test_config(&bin);
        cfg.prompt = "stay with me".into();
        ping(&cfg).await.unwrap();
        assert_eq!(std::fs::read_to_string(&capture).unwrap(), "-p stay with me");
    }

    #[tokio::test]
    async fn install_probe() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_cli(dir.path(), "echo 1.0.0");
        assert!(is_installed(&bin.display().to_string()).await);
        assert!(!is_installed("/definitely/not/a/real/cli").await);
    }
}
