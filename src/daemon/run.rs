//! Daemon runner (foreground process).
//!
//! `git-pulsar daemon run` starts the tick loop. SIGTERM/SIGINT stop job
//! intake, drain the worker pool, and exit; no repo-local fault is fatal.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{Receiver, TryRecvError};

use crate::Result;
use crate::config::{CascadeFingerprint, Config};
use crate::daemon::scheduler::{Cadence, JobKind};
use crate::daemon::worker::{Job, JobResult, run_worker_loop};
use crate::paths;
use crate::probe::SystemProbe;
use crate::reconcile;
use crate::registry::Registry;

/// Seconds between scheduler wake-ups.
const TICK_SECS: u64 = 30;

/// Worker pool bounds; config may choose within them.
const MIN_WORKERS: usize = 1;
const MAX_WORKERS: usize = 4;

/// Per-repo config cache, reloaded when a cascade file's mtime moves.
struct ConfigCache {
    entries: HashMap<PathBuf, (CascadeFingerprint, Config)>,
}

impl ConfigCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, repo: &PathBuf) -> Config {
        let current = CascadeFingerprint::capture(Some(repo));
        if let Some((fingerprint, cfg)) = self.entries.get(repo)
            && *fingerprint == current
        {
            return cfg.clone();
        }

        let cfg = Config::load(Some(repo)).unwrap_or_else(|e| {
            tracing::warn!(repo = %repo.display(), error = %e, "config load failed, using defaults");
            Config::default()
        });
        self.entries
            .insert(repo.clone(), (current, cfg.clone()));
        cfg
    }
}

/// Pid file that disappears on clean shutdown.
struct PidFile(PathBuf);

impl PidFile {
    fn write() -> Option<Self> {
        let path = paths::pid_path();
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match std::fs::write(&path, std::process::id().to_string()) {
            Ok(()) => Some(Self(path)),
            Err(e) => {
                tracing::warn!(error = %e, "could not write pid file");
                None
            }
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Run the daemon in the current process. Returns when a shutdown signal
/// has been handled and the worker pool has drained.
///
/// Only two conditions are fatal: no usable git binary, and an unwritable
/// state dir. Everything repo-local is contained by the tick loop.
pub fn run_daemon(probe: Arc<dyn SystemProbe>, global_cfg: &Config) -> Result<()> {
    preflight()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone());
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone());

    let _pid = PidFile::write();

    let workers = global_cfg.daemon.workers.clamp(MIN_WORKERS, MAX_WORKERS);
    let (job_tx, job_rx) = crossbeam::channel::unbounded::<Job>();
    let (result_tx, result_rx) = crossbeam::channel::unbounded::<JobResult>();

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx = job_rx.clone();
        let tx = result_tx.clone();
        let probe = probe.clone();
        handles.push(std::thread::spawn(move || run_worker_loop(rx, tx, probe)));
    }
    drop(job_rx);
    drop(result_tx);

    tracing::info!(workers, "daemon started");

    let mut configs = ConfigCache::new();
    let mut in_flight: HashSet<(PathBuf, JobKind)> = HashSet::new();

    while !shutdown.load(Ordering::Relaxed) {
        tick(probe.as_ref(), &mut configs, &mut in_flight, &job_tx, &result_rx);

        // Sleep in small slices so a signal is honored promptly.
        for _ in 0..(TICK_SECS * 10) {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    tracing::info!("shutdown signal received, draining workers");
    drop(job_tx);
    for handle in handles {
        let _ = handle.join();
    }
    // Apply whatever the drained workers reported.
    apply_results(&result_rx, &mut in_flight);

    tracing::info!("daemon stopped");
    Ok(())
}

fn preflight() -> Result<()> {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map_err(crate::git::GitError::MissingBinary)?;

    let state = paths::state_dir();
    std::fs::create_dir_all(&state).map_err(|source| {
        crate::registry::RegistryError::Write {
            path: state.clone(),
            source,
        }
    })?;
    Ok(())
}

fn tick(
    probe: &dyn SystemProbe,
    configs: &mut ConfigCache,
    in_flight: &mut HashSet<(PathBuf, JobKind)>,
    job_tx: &crossbeam::channel::Sender<Job>,
    result_rx: &Receiver<JobResult>,
) {
    apply_results(result_rx, in_flight);

    let mut registry = match Registry::load() {
        Ok(reg) => reg,
        Err(e) => {
            tracing::error!(error = %e, "registry unreadable, skipping tick");
            return;
        }
    };

    // Collect entries whose path is proved gone.
    let removed = registry.prune();
    if !removed.is_empty() {
        for (entry, reason) in &removed {
            tracing::info!(repo = %entry.path.display(), ?reason, "pruned from registry");
            probe.notify(
                "Pulsar tracking stopped",
                &format!("Removed missing repo: {}", entry.path.display()),
            );
        }
        if let Err(e) = registry.save() {
            tracing::error!(error = %e, "failed to persist registry prune");
        }
    }

    let maintenance = reconcile::maintenance_due();
    if maintenance {
        reconcile::touch_last_prune();
    }

    let now = probe.now();
    for entry in &registry.repos {
        let cfg = configs.get(&entry.path);
        let cadence = Cadence::from_config(&cfg);

        let mut kinds = cadence.due(entry, now);
        if maintenance && !entry.paused {
            kinds.push(JobKind::Maintenance);
        }

        for kind in kinds {
            let key = (entry.path.clone(), kind);
            if in_flight.contains(&key) {
                continue;
            }
            in_flight.insert(key);
            let _ = job_tx.send(Job {
                repo: entry.path.clone(),
                kind,
                config: cfg.clone(),
            });
        }
    }
}

fn apply_results(result_rx: &Receiver<JobResult>, in_flight: &mut HashSet<(PathBuf, JobKind)>) {
    loop {
        let result = match result_rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
        };
        in_flight.remove(&(result.repo.clone(), result.kind));

        if result.repo_vanished {
            // Next tick's registry prune will verify and collect it.
            tracing::debug!(repo = %result.repo.display(), "repo vanished mid-job");
            continue;
        }

        let Some(at) = result.record_at else {
            continue;
        };

        // The tick loop is the registry's single writer while the daemon
        // runs; foreground commands contend only through atomic rename.
        let mut registry = match Registry::load() {
            Ok(reg) => reg,
            Err(e) => {
                tracing::error!(error = %e, "registry unreadable, dropping job record");
                continue;
            }
        };
        let Some(entry) = registry.get_mut(&result.repo) else {
            continue;
        };
        match result.kind {
            JobKind::Snapshot => entry.last_snapshot_at = at,
            JobKind::Push => entry.last_push_at = at,
            JobKind::DriftCheck => entry.last_drift_check_at = at,
            JobKind::Maintenance => {}
        }
        if let Err(e) = registry.save() {
            tracing::error!(error = %e, "failed to persist job record");
        }
    }
}
