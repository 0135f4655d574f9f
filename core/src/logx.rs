use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::{MakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Informational log file inside the app config dir.
pub const OUTPUT_LOG: &str = "output.log";
/// Error-only log file inside the app config dir.
pub const ERROR_LOG: &str = "error.log";
/// Rotate a log file once it grows past this many bytes.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Initialize `tracing` once: console plus rotating `output.log` and
/// `error.log` under `dir`. Respects `RUST_LOG`; falls back to
/// `default_level`.
pub fn init(default_level: &str, dir: &Path) {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", default_level);
    }
    let out = RotatingWriter::new(dir.join(OUTPUT_LOG), MAX_LOG_BYTES);
    let err = RotatingWriter::new(dir.join(ERROR_LOG), MAX_LOG_BYTES);
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(
            fmt::layer()
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                .with_target(true),
        )
        .with(
            fmt::layer()
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                .with_ansi(false)
                .with_writer(out),
        )
        .with(
            fmt::layer()
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                .with_ansi(false)
                .with_writer(err.with_min_level(Level::ERROR)),
        )
        .try_init();
}

/// Size-capped appender: once `path` grows past `max_bytes` the previous
/// `.old` backup is dropped and the file itself becomes the new backup.
/// One backup generation, matching the rolling-log contract.
#[derive(Clone, Debug)]
pub struct RotatingWriter {
    path: PathBuf,
    max_bytes: u64,
}

impl RotatingWriter {
    /// Appender for `path`, rotating past `max_bytes`.
    pub fn new(path: PathBuf, max_bytes: u64) -> Self {
        Self { path, max_bytes }
    }

    fn rotate_if_needed(&self) {
        let Ok(meta) = fs::metadata(&self.path) else {
            return;
        };
        if meta.len() <= self.max_bytes {
            return;
        }
        let old = backup_path(&self.path);
        let _ = fs::remove_file(&old);
        let _ = fs::rename(&self.path, &old);
    }

    fn open(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed();
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}

/// Backup location for a rotated log: the same name with `.old` appended.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".old");
    PathBuf::from(os)
}

/// Per-event writer handle. Opens lazily and degrades to a sink on I/O
/// failure so logging can never take the daemon down.
pub struct LogHandle(Option<File>);

impl Write for LogHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = LogHandle;

    fn make_writer(&'a self) -> Self::Writer {
        LogHandle(self.open().ok())
    }
}

/// Shape of one log file on disk.
#[derive(Debug)]
pub struct LogStats {
    /// File location.
    pub path: PathBuf,
    /// Current size in bytes; 0 when absent.
    pub bytes: u64,
    /// Entry (line) count; 0 when absent.
    pub entries: usize,
    /// Last modification time, when available.
    pub modified: Option<std::time::SystemTime>,
}

/// Stats for `path`; zeroed when the file does not exist.
pub fn stats(path: &Path) -> LogStats {
    let meta = fs::metadata(path).ok();
    let bytes = meta.as_ref().map(|m| m.len()).unwrap_or(0);
    let modified = meta.and_then(|m| m.modified().ok());
    let entries = fs::read_to_string(path)
        .map(|t| t.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0);
    LogStats { path: path.to_path_buf(), bytes, entries, modified }
}

/// Last `count` non-empty lines of `path`; empty when the file is missing.
pub fn tail(path: &Path, count: usize) -> Vec<String> {
    let Ok(txt) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = txt.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(count);
    lines[skip..].iter().map(|s| s.to_string()).collect()
}

/// The most recent `count` entries across the output and error logs under
/// `dir`, oldest first. Lines carry a local-timestamp prefix, so a lexical
/// sort orders them. Error lines land in both files; only the copies the
/// output tail no longer shows are pulled in from the error log, and
/// repeats within one file stay repeated.
pub fn recent_entries(dir: &Path, count: usize) -> Vec<String> {
    let mut lines = tail(&dir.join(OUTPUT_LOG), count);
    for line in tail(&dir.join(ERROR_LOG), count) {
        if !lines.contains(&line) {
            lines.push(line);
        }
    }
    lines.sort();
    let skip = lines.len().saturating_sub(count);
    lines.split_off(skip)
}
