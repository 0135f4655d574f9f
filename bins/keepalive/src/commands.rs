use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use colored::Colorize;
use ka_core::cfg::{self, InvalidConfig};
use ka_core::logx;
use ka_core::pidfile::{self, PidFile};

use crate::scheduler::{self, Mode};
use crate::{ping, StartOpts, APP};

const BIN: &str = env!("CARGO_PKG_NAME");

/// `start`: refuse while a daemon is live, probe the CLI, persist any
/// flag overrides, then run in the foreground or hand off to a detached
/// copy of this binary.
pub async fn start(opts: &StartOpts) -> Result<()> {
    let manual = opts.from.is_some() || opts.count.is_some();
    let overrides = opts.overrides();

    let marker = PidFile::for_app(&APP)?;
    if let Some(pid) = marker.read() {
        if pidfile::is_live(pid) {
            println!("{} already running (PID {})", "Warning:".yellow().bold(), pid);
            println!("  check it with `{BIN} status`, stop it with `{BIN} stop`");
            bail!("start refused");
        }
    }

    let stored = cfg::load_or_init(&APP)?;
    println!("{} checking the {} CLI...", "Info:".blue(), stored.claude_bin);
    if !ping::is_installed(&stored.claude_bin).await {
        println!(
            "{} {} is not installed or not responding",
            "Error:".red().bold(),
            stored.claude_bin
        );
        println!("{}", "  install it first:".yellow());
        println!("    npm install -g @anthropic-ai/claude-code");
        println!("    claude auth");
        bail!("start refused");
    }
    println!("{} {} is ready", "OK".green(), stored.claude_bin);

    // Flag overrides become the stored config, so the detached daemon and
    // later runs see them. Validation rejects them wholesale.
    let cfg = if overrides.is_empty() {
        stored
    } else {
        match cfg::update(&APP, |c| overrides.apply(c)) {
            Ok(cfg) => cfg,
            Err(e) => match e.downcast_ref::<InvalidConfig>() {
                Some(bad) => return Err(reject_config(bad)),
                None => return Err(e),
            },
        }
    };
    // The stored file is hand-editable; check the effective record even
    // when no flag changed it.
    if let Err(bad) = cfg.validate() {
        return Err(reject_config(&bad));
    }

    let now = Local::now().naive_local();
    let mode = scheduler::pick_mode(&cfg, manual, now);
    if opts.dry_run {
        scheduler::print_dry_run(&mode, now);
        return Ok(());
    }

    if opts.foreground {
        println!("{} starting in the foreground, ctrl-c stops it", "Info:".blue());
        println!("  interval {}h, burst {} attempts", cfg.interval_hours, cfg.burst_count);
        return scheduler::run_daemon(&APP, &overrides, manual).await;
    }

    let child = spawn_detached(opts)?;
    println!("{} daemon started (PID {child})", "OK".green());
    match &mode {
        Mode::Manual { instants } => {
            if let Some(first) = instants.first() {
                println!("  first ping at {}", first.format("%Y-%m-%d %H:%M"));
            }
        }
        Mode::Auto { interval_hours } => {
            println!("  first ping now, then every {interval_hours}h");
        }
    }
    println!("  check on it with `{BIN} status`");
    Ok(())
}

/// Re-exec this binary as a detached daemon. Config values are already
/// persisted; only the mode-selecting flags need forwarding.
fn spawn_detached(opts: &StartOpts) -> Result<u32> {
    let exe = std::env::current_exe().context("could not resolve the current executable")?;
    let mut cmd = std::process::Command::new(exe);
    cmd.arg("start").arg("--foreground");
    if let Some(from) = &opts.from {
        cmd.arg("--from").arg(from);
    }
    if let Some(count) = opts.count {
        cmd.arg("--count").arg(count.to_string());
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let child = cmd.spawn().context("could not launch the background daemon")?;
    Ok(child.id())
}

/// `stop`: ask a live daemon to terminate, or clean up a stale marker.
pub fn stop() -> Result<()> {
    let marker = PidFile::for_app(&APP)?;
    let Some(pid) = marker.read() else {
        println!("{} no running daemon found", "Warning:".yellow().bold());
        return Ok(());
    };
    if !pidfile::is_live(pid) {
        println!(
            "{} PID {} is not running, removing the stale marker",
            "Warning:".yellow().bold(),
            pid
        );
        marker.remove();
        return Ok(());
    }

    println!("{} stopping the daemon (PID {pid})...", "Info:".blue());
    if pidfile::request_stop(pid) {
        marker.remove();
        println!("{} stop requested", "OK".green());
        Ok(())
    } else {
        marker.remove();
        println!("{} could not signal PID {pid}", "Error:".red().bold());
        bail!("stop failed");
    }
}

/// `status`: liveness, a next-ping estimate, and the config summary.
pub fn status() -> Result<()> {
    let cfg = cfg::load_or_init(&APP)?;
    let marker = PidFile::for_app(&APP)?;

    match marker.read() {
        Some(pid) if pidfile::is_live(pid) => {
            println!("{} running (PID {pid})", "OK".green());
            let next = Local::now().naive_local()
                + chrono::Duration::hours(i64::from(cfg.interval_hours));
            println!("  next ping estimated by {}", next.format("%Y-%m-%d %H:%M"));
        }
        Some(pid) => {
            println!("{} not running", "Stopped:".red().bold());
            println!(
                "{} stale PID marker found (PID {}), `{BIN} stop` cleans it up",
                "Warning:".yellow().bold(),
                pid
            );
        }
        None => println!("{} not running", "Stopped:".red().bold()),
    }

    println!();
    println!("Configuration ({}):", cfg::config_path(&APP)?.display());
    println!("  interval        {}h", cfg.interval_hours);
    println!(
        "  burst           {} attempts, {}min apart",
        cfg.burst_count, cfg.burst_interval_minutes
    );
    println!("  daily schedule  {} pings from {}", cfg.daily_count, cfg.start_time);
    println!("  timeout         {}ms", cfg.timeout_millis);
    println!("  prompt          {:?}", cfg.prompt);
    Ok(())
}

/// `logs`: per-file stats plus the most recent entries of both logs.
pub fn logs() -> Result<()> {
    let dir = cfg::config_dir(&APP)?;

    println!("Log files:");
    for name in [logx::OUTPUT_LOG, logx::ERROR_LOG] {
        let st = logx::stats(&dir.join(name));
        match st.modified {
            Some(t) => {
                let when = chrono::DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M");
                println!(
                    "  {}  {}, {} entries, updated {}",
                    st.path.display(),
                    human_bytes(st.bytes),
                    st.entries,
                    when
                );
            }
            None => println!("  {}  (not created yet)", st.path.display()),
        }
    }
    println!();

    let entries = logx::recent_entries(&dir, 20);
    if entries.is_empty() {
        println!("{} no log entries yet", "Warning:".yellow().bold());
        return Ok(());
    }
    for line in &entries {
        if line.contains("ERROR") {
            println!("{}", line.red());
        } else {
            println!("{line}");
        }
    }
    println!();
    println!("showing the {} most recent entries", entries.len());
    println!("follow live with `tail -f {}`", dir.join(logx::OUTPUT_LOG).display());
    Ok(())
}

/// `test`: install probe, resolved path, then one timed live ping.
pub async fn test_connection() -> Result<()> {
    let cfg = cfg::load_or_init(&APP)?;

    println!("{} checking the {} CLI...", "Info:".blue(), cfg.claude_bin);
    if !ping::is_installed(&cfg.claude_bin).await {
        println!(
            "{} {} is not installed or not in PATH",
            "Error:".red().bold(),
            cfg.claude_bin
        );
        println!("{}", "  install it first:".yellow());
        println!("    npm install -g @anthropic-ai/claude-code");
        println!("    claude auth");
        bail!("CLI not usable");
    }
    match which::which(&cfg.claude_bin) {
        Ok(path) => println!("{} {} found at {}", "OK".green(), cfg.claude_bin, path.display()),
        Err(_) => println!("{} could not resolve the CLI path", "Warning:".yellow().bold()),
    }

    println!("{} sending one ping ({:?})...", "Info:".blue(), cfg.prompt);
    let started = std::time::Instant::now();
    match ping::ping(&cfg).await {
        Ok(()) => {
            println!(
                "{} ping answered in {:.1}s",
                "OK".green(),
                started.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} ping failed: {e}", "Error:".red().bold());
            let hint = e.to_string().to_lowercase();
            if hint.contains("auth") || hint.contains("login") || hint.contains("log in") {
                println!("{}", "  looks like an authentication problem, try:".yellow());
                println!("    claude auth");
            } else {
                println!("{}", "  troubleshooting:".yellow());
                println!("    1. check your network connection");
                println!("    2. run `{} --version` yourself", cfg.claude_bin);
                println!("    3. refresh credentials with `claude auth`");
                println!("    4. raise timeoutMillis in the config if pings run long");
            }
            bail!("test failed");
        }
    }
}

/// `config`: file location plus the effective JSON.
pub fn config_show() -> Result<()> {
    let path = cfg::config_path(&APP)?;
    let cfg = cfg::load_or_init(&APP)?;
    println!("{} {}", "Config file:".blue(), path.display());
    let pretty =
        serde_json::to_string_pretty(&cfg).context("could not render the configuration")?;
    println!("{}", pretty.green());
    println!();
    println!("edit the file directly or pass flags to `{BIN} start`");
    Ok(())
}

fn reject_config(bad: &InvalidConfig) -> anyhow::Error {
    println!("{} configuration rejected:", "Error:".red().bold());
    for reason in &bad.reasons {
        println!("  - {reason}");
    }
    anyhow!("start refused")
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_picks_sane_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KB");
        assert_eq!(human_bytes(10 * 1024 * 1024), "10.0 MB");
    }
}
