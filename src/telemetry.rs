//! Tracing setup: stderr layer always, rotating file layer for the daemon.

use std::fs;
use std::path::{Path, PathBuf};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::LevelFilter};

use crate::paths;

const LOG_FILE_PREFIX: &str = "daemon.log";

/// How many rotated log files survive a retention pass.
const MAX_LOG_FILES: usize = 5;

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// `-v` count from the CLI.
    pub verbosity: u8,
    /// Write a rotating log file under the state dir (daemon mode).
    pub log_to_file: bool,
    /// Total bytes the rotated files may occupy.
    pub max_log_bytes: u64,
}

pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the global subscriber. The returned guard flushes the file
/// writer on drop.
pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(config.verbosity).into())
        .with_env_var("LOG")
        .from_env_lossy();

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(Box::new(
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr),
    ));

    if config.log_to_file {
        let dir = paths::state_dir();
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                if let Err(e) = prune_logs(&dir, LOG_FILE_PREFIX, config.max_log_bytes) {
                    tracing::warn!(error = %e, "log retention failed");
                }
                let appender = tracing_appender::rolling::RollingFileAppender::new(
                    tracing_appender::rolling::Rotation::DAILY,
                    &dir,
                    LOG_FILE_PREFIX,
                );
                let (writer, guard) = tracing_appender::non_blocking(appender);
                guards.push(guard);
                layers.push(Box::new(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                ));
            }
            Err(e) => {
                eprintln!("log dir init failed for {}: {e}", dir.display());
            }
        }
    }

    layers.push(Box::new(filter));
    Registry::default().with(layers).init();

    TelemetryGuard { _guards: guards }
}

fn level_from_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Drop the oldest rotated files once the set exceeds the byte cap or the
/// file-count cap. Rotated names sort chronologically (`prefix.YYYY-MM-DD`).
fn prune_logs(dir: &Path, prefix: &str, max_bytes: u64) -> std::io::Result<()> {
    let mut files: Vec<(PathBuf, u64)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .filter_map(|e| {
            let len = e.metadata().ok()?.len();
            Some((e.path(), len))
        })
        .collect();
    files.sort_by(|a, b| b.0.cmp(&a.0)); // newest first

    let mut kept_bytes = 0u64;
    for (i, (path, len)) in files.iter().enumerate() {
        kept_bytes += len;
        if i >= MAX_LOG_FILES || kept_bytes > max_bytes {
            let _ = fs::remove_file(path);
        }
    }
    Ok(())
}
