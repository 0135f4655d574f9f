use ka_core::cfg::Config;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::ping;

/// Run one burst of `burst_count` pings with `burst_interval_minutes`
/// between attempts, each pause measured from the end of the previous
/// attempt. A failed attempt never aborts the rest. Returns how many
/// attempts succeeded; a shutdown signal during a pause abandons the
/// remainder.
pub async fn run_burst(cfg: &Config, shutdown: &mut watch::Receiver<bool>) -> u32 {
    let total = cfg.burst_count;
    let pause = Duration::from_secs(u64::from(cfg.burst_interval_minutes) * 60);
    let mut succeeded = 0;

    for attempt in 1..=total {
        if attempt > 1 {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("shutdown during burst, stopping after {} of {} attempts", attempt - 1, total);
                    return succeeded;
                }
                _ = sleep(pause) => {}
            }
        }
        info!("ping attempt {}/{}", attempt, total);
        let started = std::time::Instant::now();
        match ping::ping(cfg).await {
            Ok(()) => {
                succeeded += 1;
                info!("attempt {}/{} ok in {:?}", attempt, total, started.elapsed());
            }
            Err(e) => warn!("attempt {}/{} failed: {}", attempt, total, e),
        }
    }

    info!("burst done: {}/{} attempts succeeded", succeeded, total);
    succeeded
}
