use std::sync::Arc;

use crate::config::Config;
use crate::daemon::run_daemon;
use crate::probe::SystemProbe;

pub(crate) fn handle(probe: Arc<dyn SystemProbe>) -> u8 {
    let cfg = Config::load(None).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "global config load failed, using defaults");
        Config::default()
    });

    match run_daemon(probe, &cfg) {
        Ok(()) => 0,
        Err(e) => {
            // Only state-store I/O and missing tooling reach here; repo
            // faults never escape the tick loop.
            tracing::error!(error = %e, "daemon exited with error");
            1
        }
    }
}
