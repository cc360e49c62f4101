use std::sync::Arc;

use git_pulsar::cli::{self, Commands, DaemonCmd};
use git_pulsar::config::Config;
use git_pulsar::probe::HostProbe;
use git_pulsar::telemetry;

fn main() {
    let cli = cli::parse_from(std::env::args_os());

    let daemon_mode = matches!(
        cli.command,
        Some(Commands::Daemon {
            cmd: DaemonCmd::Run
        })
    );
    let _telemetry_guard = init_tracing(cli.verbose, daemon_mode);

    let probe = Arc::new(HostProbe);
    let code = cli::run(cli, probe);
    std::process::exit(code as i32);
}

fn init_tracing(verbose: u8, daemon_mode: bool) -> telemetry::TelemetryGuard {
    let max_log_bytes = Config::load(None)
        .map(|cfg| cfg.limits.max_log_size)
        .unwrap_or_else(|e| {
            eprintln!("config load failed, using defaults: {e}");
            Config::default().limits.max_log_size
        });

    telemetry::init(telemetry::TelemetryConfig {
        verbosity: verbose,
        log_to_file: daemon_mode,
        max_log_bytes,
    })
}
