use anyhow::{Context, Result};
use chrono::NaiveTime;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const CONFIG_FILE: &str = "config.json";

/// Identifier used to compute per-app configuration directories.
#[derive(Clone, Copy)]
pub struct AppId {
    /// Reverse-DNS style qualifier, e.g. `"com"`.
    pub qualifier: &'static str,
    /// Organization or vendor name, e.g. `"local"`.
    pub organization: &'static str,
    /// Application name, e.g. `"claude-keepalive"`.
    pub application: &'static str,
}

/// Keepalive configuration persisted to `config.json` (camelCase keys).
///
/// One record drives a whole daemon run: scheduling cadence, burst shape,
/// and the external tool invocation. Loaded once per process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Hours between scheduled runs.
    pub interval_hours: u32,
    /// Ping attempts per scheduled run.
    pub burst_count: u32,
    /// Minutes between attempts within a burst.
    pub burst_interval_minutes: u32,
    /// Hard per-ping timeout in milliseconds.
    pub timeout_millis: u64,
    /// Daily start time for manual mode, `HH:MM` 24-hour.
    pub start_time: String,
    /// Firings per day in manual mode.
    pub daily_count: u32,
    /// Prompt sent to the tool on every ping.
    pub prompt: String,
    /// Tracing level when `RUST_LOG` is unset (e.g. `"info"`).
    pub log_level: String,
    /// External tool executable: bare name for PATH lookup or a full path.
    pub claude_bin: String,
    /// Keys written by other or newer versions; preserved on rewrite.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_hours: 5,
            burst_count: 3,
            burst_interval_minutes: 2,
            timeout_millis: 30_000,
            start_time: "07:00".to_string(),
            daily_count: 3,
            prompt: "What time is it now?".to_string(),
            log_level: "info".to_string(),
            claude_bin: "claude".to_string(),
            extra: serde_json::Map::new(),
        }
    }
}

/// A rejected configuration update: one reason per violated field, and the
/// stored file is left untouched (no partial apply).
#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {}", reasons.join("; "))]
pub struct InvalidConfig {
    /// Human-readable reason for each violated field.
    pub reasons: Vec<String>,
}

impl Config {
    /// Check every field against its documented range.
    pub fn validate(&self) -> std::result::Result<(), InvalidConfig> {
        let mut reasons = Vec::new();
        if !(1..=24).contains(&self.interval_hours) {
            reasons.push(format!(
                "intervalHours must be 1..=24 (got {})",
                self.interval_hours
            ));
        }
        if !(1..=10).contains(&self.burst_count) {
            reasons.push(format!("burstCount must be 1..=10 (got {})", self.burst_count));
        }
        if !(1..=60).contains(&self.burst_interval_minutes) {
            reasons.push(format!(
                "burstIntervalMinutes must be 1..=60 (got {})",
                self.burst_interval_minutes
            ));
        }
        if !(5_000..=120_000).contains(&self.timeout_millis) {
            reasons.push(format!(
                "timeoutMillis must be 5000..=120000 (got {})",
                self.timeout_millis
            ));
        }
        if NaiveTime::parse_from_str(&self.start_time, "%H:%M").is_err() {
            reasons.push(format!(
                "startTime must be HH:MM 24-hour time (got {:?})",
                self.start_time
            ));
        }
        if !(1..=10).contains(&self.daily_count) {
            reasons.push(format!("dailyCount must be 1..=10 (got {})", self.daily_count));
        }
        if self.prompt.trim().is_empty() {
            reasons.push("prompt must not be empty".to_string());
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            reasons.push(format!(
                "logLevel must be trace, debug, info, warn, or error (got {:?})",
                self.log_level
            ));
        }
        if self.claude_bin.trim().is_empty() {
            reasons.push("claudeBin must not be empty".to_string());
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(InvalidConfig { reasons })
        }
    }

    /// Parsed `startTime`. Validation guarantees this parses; midnight is
    /// the fallback for unvalidated records.
    pub fn start_time_of_day(&self) -> NaiveTime {
        NaiveTime::parse_from_str(&self.start_time, "%H:%M").unwrap_or(NaiveTime::MIN)
    }
}

/// Per-invocation overrides; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Hours between scheduled runs.
    pub interval_hours: Option<u32>,
    /// Ping attempts per scheduled run.
    pub burst_count: Option<u32>,
    /// Minutes between attempts within a burst.
    pub burst_interval_minutes: Option<u32>,
    /// Daily start time, `HH:MM`.
    pub start_time: Option<String>,
    /// Firings per day in manual mode.
    pub daily_count: Option<u32>,
}

impl Overrides {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.interval_hours.is_none()
            && self.burst_count.is_none()
            && self.burst_interval_minutes.is_none()
            && self.start_time.is_none()
            && self.daily_count.is_none()
    }

    /// Copy the set fields onto `cfg`.
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(v) = self.interval_hours {
            cfg.interval_hours = v;
        }
        if let Some(v) = self.burst_count {
            cfg.burst_count = v;
        }
        if let Some(v) = self.burst_interval_minutes {
            cfg.burst_interval_minutes = v;
        }
        if let Some(v) = &self.start_time {
            cfg.start_time = v.clone();
        }
        if let Some(v) = self.daily_count {
            cfg.daily_count = v;
        }
    }
}

/// Return the configuration directory for this app, creating it if needed.
pub fn config_dir(app: &AppId) -> Result<PathBuf> {
    let pd = ProjectDirs::from(app.qualifier, app.organization, app.application)
        .ok_or_else(|| anyhow::anyhow!("failed to resolve ProjectDirs"))?;
    let dir = pd.config_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create config dir {}", dir.display()))?;
    Ok(dir)
}

/// Location of `config.json` inside the app config dir.
pub fn config_path(app: &AppId) -> Result<PathBuf> {
    Ok(config_dir(app)?.join(CONFIG_FILE))
}

/// Load `config.json` from the app config dir, writing defaults on first run.
pub fn load_or_init(app: &AppId) -> Result<Config> {
    let path = config_path(app)?;
    if !path.exists() {
        let cfg = Config::default();
        save_path(&path, &cfg)?;
        return Ok(cfg);
    }
    Ok(load_path(&path))
}

/// Config at `path`. Missing files yield defaults; unreadable or malformed
/// files are logged and also yield defaults (fail-open, like the marker).
pub fn load_path(path: &Path) -> Config {
    let txt = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("config unreadable ({e}); using defaults");
            }
            return Config::default();
        }
    };
    match serde_json::from_str(&txt) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("config malformed ({e}); using defaults");
            Config::default()
        }
    }
}

/// Write `cfg` to `path` as pretty JSON. Temp-then-rename so readers never
/// see a torn file.
pub fn save_path(path: &Path, cfg: &Config) -> Result<()> {
    let s = serde_json::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, s).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// Read-modify-write the stored config: apply `mutate`, validate the whole
/// record, persist only when validation passes. Unknown keys survive.
pub fn update<F: FnOnce(&mut Config)>(app: &AppId, mutate: F) -> Result<Config> {
    let path = config_path(app)?;
    update_path(&path, mutate)
}

/// [`update`] against an explicit path.
pub fn update_path<F: FnOnce(&mut Config)>(path: &Path, mutate: F) -> Result<Config> {
    let mut cfg = load_path(path);
    mutate(&mut cfg);
    cfg.validate()?;
    save_path(path, &cfg)?;
    Ok(cfg)
}
