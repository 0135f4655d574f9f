//! claude-keepalive: pings the `claude` CLI on a schedule so an open
//! session does not expire while a machine sits idle.

use clap::{Args, Parser, Subcommand};
use ka_core::cfg::{self, AppId, Overrides};
use ka_core::logx;

mod autostart;
mod burst;
mod commands;
mod ping;
mod scheduler;
#[cfg(test)]
mod testutil;

pub(crate) const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: env!("CARGO_PKG_NAME"), // config dir derives from the crate name
};

#[derive(Parser)]
#[command(name=env!("CARGO_PKG_NAME"), version, about="Keepalive daemon for the claude CLI")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the keepalive daemon (detached unless --foreground)
    Start(StartOpts),
    /// Stop the running daemon
    Stop,
    /// Show daemon liveness and the configuration summary
    Status,
    /// Show recent log activity
    Logs,
    /// Probe the CLI and send one live ping
    Test,
    /// Print the configuration file
    Config,
    /// Manage launch-at-login registration
    Autostart {
        #[command(subcommand)]
        action: AutostartCmd,
    },
}

#[derive(Subcommand)]
enum AutostartCmd {
    /// Register the daemon to launch at login
    Enable,
    /// Remove the login registration
    Disable,
    /// Show the current registration
    Status,
}

/// Flags for `start`. The scheduling values carry no clap defaults on
/// purpose: giving --from or --count selects the daily schedule, and
/// absent flags fall back to the stored config.
#[derive(Args)]
pub(crate) struct StartOpts {
    /// First ping time for the daily schedule (HH:MM, 24h)
    #[arg(long, value_name = "HH:MM")]
    pub from: Option<String>,
    /// Hours between pings
    #[arg(long, value_name = "HOURS")]
    pub interval: Option<u32>,
    /// Pings per day on the daily schedule
    #[arg(long, value_name = "N")]
    pub count: Option<u32>,
    /// Ping attempts per burst
    #[arg(long, value_name = "N")]
    pub burst: Option<u32>,
    /// Minutes between burst attempts
    #[arg(long, value_name = "MINUTES")]
    pub burst_interval: Option<u32>,
    /// Stay attached to the terminal instead of detaching
    #[arg(long)]
    pub foreground: bool,
    /// Print the firing schedule without starting anything
    #[arg(long)]
    pub dry_run: bool,
}

impl StartOpts {
    pub(crate) fn overrides(&self) -> Overrides {
        Overrides {
            interval_hours: self.interval,
            burst_count: self.burst,
            burst_interval_minutes: self.burst_interval,
            start_time: self.from.clone(),
            daily_count: self.count,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging before dispatch: any command may warn, and the daemon path
    // needs the file writers in place before it arms timers.
    let cfg = cfg::load_or_init(&APP)?;
    logx::init(&cfg.log_level, &cfg::config_dir(&APP)?);

    match cli.cmd {
        Command::Start(opts) => commands::start(&opts).await,
        Command::Stop => commands::stop(),
        Command::Status => commands::status(),
        Command::Logs => commands::logs(),
        Command::Test => commands::test_connection().await,
        Command::Config => commands::config_show(),
        Command::Autostart { action } => match action {
            AutostartCmd::Enable => autostart::enable(),
            AutostartCmd::Disable => autostart::disable(),
            AutostartCmd::Status => autostart::status(),
        },
    }
}
