use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use directories::BaseDirs;

const LABEL: &str = "com.claude-keepalive";
const UNIT: &str = "claude-keepalive.service";
const TASK: &str = "ClaudeKeepalive";

/// Register the daemon to launch at login: a launchd user agent on macOS,
/// a systemd user unit on Linux, a logon task on Windows.
pub fn enable() -> Result<()> {
    let exe = std::env::current_exe().context("could not resolve the current executable")?;
    match std::env::consts::OS {
        "macos" => {
            let path = plist_path()?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, plist(&exe))
                .with_context(|| format!("could not write {}", path.display()))?;
            run(Command::new("launchctl").args(["load", "-w"]).arg(&path))?;
        }
        "linux" => {
            let path = unit_path()?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, unit(&exe))
                .with_context(|| format!("could not write {}", path.display()))?;
            run(Command::new("systemctl").args(["--user", "daemon-reload"]))?;
            run(Command::new("systemctl").args(["--user", "enable", UNIT]))?;
        }
        "windows" => {
            let tr = format!("\"{}\" start", exe.display());
            run(Command::new("schtasks")
                .args(["/create", "/tn", TASK, "/sc", "onlogon", "/tr", &tr, "/f"]))?;
        }
        other => bail!("autostart is not supported on {}", other),
    }
    println!("{} autostart enabled", "OK".green());
    Ok(())
}

/// Undo `enable`. Registrations that never existed are fine.
pub fn disable() -> Result<()> {
    match std::env::consts::OS {
        "macos" => {
            let path = plist_path()?;
            if path.exists() {
                // The agent may not be loaded right now; unload errors are fine.
                let _ = Command::new("launchctl").args(["unload", "-w"]).arg(&path).status();
                std::fs::remove_file(&path)
                    .with_context(|| format!("could not remove {}", path.display()))?;
            }
        }
        "linux" => {
            let path = unit_path()?;
            if path.exists() {
                let _ = Command::new("systemctl").args(["--user", "disable", UNIT]).status();
                std::fs::remove_file(&path)
                    .with_context(|| format!("could not remove {}", path.display()))?;
                let _ = Command::new("systemctl").args(["--user", "daemon-reload"]).status();
            }
        }
        "windows" => {
            let _ = Command::new("schtasks").args(["/delete", "/tn", TASK, "/f"]).status();
        }
        other => bail!("autostart is not supported on {}", other),
    }
    println!("{} autostart disabled", "OK".green());
    Ok(())
}

/// Report whether a login-launch registration exists and where.
pub fn status() -> Result<()> {
    let (kind, location, present) = probe()?;
    println!("{} {}", "Autostart:".blue(), kind);
    println!("  location  {}", location);
    if present {
        println!("  {}", "registered".green());
    } else {
        println!("  {}", "not registered".yellow());
    }
    Ok(())
}

fn probe() -> Result<(&'static str, String, bool)> {
    match std::env::consts::OS {
        "macos" => {
            let p = plist_path()?;
            Ok(("launchd user agent", p.display().to_string(), p.exists()))
        }
        "linux" => {
            let p = unit_path()?;
            Ok(("systemd user unit", p.display().to_string(), p.exists()))
        }
        "windows" => {
            let found = Command::new("schtasks")
                .args(["/query", "/tn", TASK])
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false);
            Ok(("scheduled logon task", format!("task {TASK}"), found))
        }
        other => bail!("autostart is not supported on {}", other),
    }
}

fn home() -> Result<PathBuf> {
    Ok(BaseDirs::new()
        .context("no home directory")?
        .home_dir()
        .to_path_buf())
}

fn plist_path() -> Result<PathBuf> {
    Ok(home()?.join("Library/LaunchAgents").join(format!("{LABEL}.plist")))
}

fn unit_path() -> Result<PathBuf> {
    Ok(home()?.join(".config/systemd/user").join(UNIT))
}

fn run(cmd: &mut Command) -> Result<()> {
    let status = cmd
        .status()
        .with_context(|| format!("could not run {:?}", cmd.get_program()))?;
    if !status.success() {
        bail!("{:?} exited with {:?}", cmd.get_program(), status.code());
    }
    Ok(())
}

fn plist(exe: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{exe}</string>
        <string>start</string>
        <string>--foreground</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <false/>
</dict>
</plist>
"#,
        label = LABEL,
        exe = exe.display()
    )
}

fn unit(exe: &Path) -> String {
    // The user's PATH is baked in so the unit can resolve the CLI; systemd
    // user sessions start with a minimal one.
    format!(
        r#"[Unit]
Description=claude-keepalive session pinger

[Service]
ExecStart={exe} start --foreground
Restart=on-failure
RestartSec=10
Environment=PATH={path}

[Install]
WantedBy=default.target
"#,
        exe = exe.display(),
        path = std::env::var("PATH").unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_file_keeps_the_daemon_in_the_foreground() {
        let text = unit(Path::new("/usr/local/bin/claude-keepalive"));
        assert!(text.contains("ExecStart=/usr/local/bin/claude-keepalive start --foreground"));
        assert!(text.contains("WantedBy=default.target"));
        assert!(text.contains("Restart=on-failure"));
    }

    #[test]
    fn plist_declares_label_and_arguments() {
        let text = plist(Path::new("/opt/claude-keepalive"));
        assert!(text.contains("<string>com.claude-keepalive</string>"));
        assert!(text.contains("<string>/opt/claude-keepalive</string>"));
        assert!(text.contains("<string>--foreground</string>"));
        assert!(text.contains("<key>RunAtLoad</key>"));
    }
}
