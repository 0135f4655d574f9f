use std::future::Future;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use colored::Colorize;
use ka_core::cfg::{self, AppId, Config, Overrides};
use ka_core::pidfile::{PidFile, PidGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Duration, Instant};
use tracing::{debug, info};

use crate::burst;

/// How firings are timed. Picked once at daemon start, immutable after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Fire now, then every `interval_hours`, indefinitely.
    Auto { interval_hours: u32 },
    /// Fire once at each instant, in order, then idle.
    Manual { instants: Vec<NaiveDateTime> },
}

impl Mode {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Auto { .. } => "auto",
            Mode::Manual { .. } => "manual",
        }
    }
}

/// Mode for this run: manual when a manual-mode flag was given on the
/// command line, auto otherwise.
pub fn pick_mode(cfg: &Config, manual: bool, now: NaiveDateTime) -> Mode {
    if manual {
        Mode::Manual { instants: manual_instants(cfg, now) }
    } else {
        Mode::Auto { interval_hours: cfg.interval_hours }
    }
}

/// The `daily_count` firing instants: today at `start_time`, rolled
/// forward one day when that base has already passed, then spaced
/// `interval_hours` apart. The roll applies to the base exactly once;
/// offsets may cross midnight without re-rolling.
pub fn manual_instants(cfg: &Config, now: NaiveDateTime) -> Vec<NaiveDateTime> {
    let mut base = now.date().and_time(cfg.start_time_of_day());
    if base <= now {
        base += chrono::Duration::days(1);
    }
    (0..cfg.daily_count)
        .map(|i| base + chrono::Duration::hours(i64::from(i) * i64::from(cfg.interval_hours)))
        .collect()
}

/// Print the firing sequence `start` would arm, without arming anything.
pub fn print_dry_run(mode: &Mode, now: NaiveDateTime) {
    match mode {
        Mode::Manual { instants } => {
            println!("{} manual schedule, {} firings:", "Dry run:".blue(), instants.len());
            for (i, at) in instants.iter().enumerate() {
                println!("  {:>2}. {}", i + 1, at.format("%Y-%m-%d %H:%M"));
            }
        }
        Mode::Auto { interval_hours } => {
            println!("{} auto schedule, every {}h:", "Dry run:".blue(), interval_hours);
            for i in 0..5i64 {
                let at = now + chrono::Duration::hours(i * i64::from(*interval_hours));
                let note = if i == 0 { "  (immediately)" } else { "" };
                println!("  {:>2}. {}{}", i + 1, at.format("%Y-%m-%d %H:%M"), note);
            }
            println!("      ...then every {}h until stopped", interval_hours);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Stopped,
}

/// Owns the armed timer work. One per daemon process; states move
/// `Idle -> Running -> Stopped`, one way.
pub struct Scheduler {
    state: State,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { state: State::Idle, shutdown, worker: None }
    }

    /// Receiver for the stop flag. Burst delays select on it so a stop
    /// cuts through pending waits.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Arm the timer work for `mode` and enter `Running`. `fire` is
    /// invoked with the 1-based firing number at every trigger instant.
    /// Errors unless the scheduler is idle.
    pub fn start<F, Fut>(&mut self, mode: Mode, fire: F) -> Result<()>
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.state != State::Idle {
            bail!("scheduler is not idle");
        }
        let rx = self.shutdown.subscribe();
        self.worker = Some(tokio::spawn(async move {
            match mode {
                Mode::Auto { interval_hours } => run_auto(interval_hours, rx, fire).await,
                Mode::Manual { instants } => run_manual(instants, rx, fire).await,
            }
        }));
        self.state = State::Running;
        Ok(())
    }

    /// Raise the stop flag and join the timer task. Idempotent. Once this
    /// returns no further firing can start; a ping already executing runs
    /// to its own completion or timeout.
    pub async fn stop(&mut self) {
        self.state = State::Stopped;
        let _ = self.shutdown.send(true);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

async fn run_auto<F, Fut>(interval_hours: u32, mut shutdown: watch::Receiver<bool>, mut fire: F)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ()>,
{
    // interval() ticks at T0 + n*period, so lateness in one firing does
    // not push the rest back. First tick lands immediately.
    let period = Duration::from_millis(u64::from(interval_hours) * 60 * 60 * 1000);
    let mut ticker = interval(period);
    let mut n = 0u32;
    info!("auto mode: firing every {}h, first one now", interval_hours);
    loop {
        // The select only decides; the firing awaits after it so the
        // shutdown guard is not held across the firing.
        let stopping = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => true,
            _ = ticker.tick() => false,
        };
        if stopping {
            info!("scheduler stopping");
            break;
        }
        n += 1;
        fire(n).await;
    }
}

async fn run_manual<F, Fut>(
    instants: Vec<NaiveDateTime>,
    mut shutdown: watch::Receiver<bool>,
    mut fire: F,
) where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ()>,
{
    // Freeze every deadline up front so each one-shot targets an absolute
    // instant rather than a delay recomputed after the previous firing.
    // An instant already behind the clock fires immediately.
    let now = Local::now().naive_local();
    let start = Instant::now();
    let total = instants.len();
    let deadlines: Vec<(u32, Instant, NaiveDateTime)> = instants
        .iter()
        .enumerate()
        .map(|(i, at)| {
            let wait = (*at - now).to_std().unwrap_or(Duration::ZERO);
            (i as u32 + 1, start + wait, *at)
        })
        .collect();
    if let Some((_, _, first)) = deadlines.first() {
        info!("manual mode: {} firings, first at {}", total, first.format("%Y-%m-%d %H:%M"));
    }

    for (n, deadline, at) in deadlines {
        debug!("firing {}/{} armed for {}", n, total, at.format("%Y-%m-%d %H:%M"));
        let stopping = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => true,
            _ = sleep_until(deadline) => false,
        };
        if stopping {
            info!("scheduler stopping");
            return;
        }
        fire(n).await;
    }

    info!("daily schedule exhausted, idle until stopped");
    let _ = shutdown.wait_for(|stop| *stop).await;
    info!("scheduler stopping");
}

/// Daemon entry: merge CLI overrides over the stored config, validate,
/// claim the PID marker, arm the scheduler, then hold until a termination
/// signal. Detached starts re-exec into this path via `--foreground`.
pub async fn run_daemon(app: &AppId, overrides: &Overrides, manual: bool) -> Result<()> {
    let mut cfg = cfg::load_or_init(app)?;
    overrides.apply(&mut cfg);
    cfg.validate()?;

    // Marker write failure is fatal: stop and status would go blind.
    let _guard = PidGuard::register(PidFile::for_app(app)?, std::process::id())
        .context("could not write the PID marker")?;

    let now = Local::now().naive_local();
    let mode = pick_mode(&cfg, manual, now);
    info!("daemon up (PID {}), {} mode", std::process::id(), mode.name());

    let mut scheduler = Scheduler::new();
    let burst_cfg = cfg.clone();
    let burst_rx = scheduler.shutdown_signal();
    scheduler.start(mode, move |n| {
        let cfg = burst_cfg.clone();
        let mut rx = burst_rx.clone();
        async move {
            info!("scheduled firing {}", n);
            let ok = burst::run_burst(&cfg, &mut rx).await;
            info!("firing {}: {}/{} pings succeeded", n, ok, cfg.burst_count);
        }
    })?;

    wait_for_signal().await;
    info!("termination signal received");
    scheduler.stop().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).ok();
    let mut hup = signal(SignalKind::hangup()).ok();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = recv_or_pending(&mut term) => {}
        _ = recv_or_pending(&mut hup) => {}
    }
}

#[cfg(unix)]
async fn recv_or_pending(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
