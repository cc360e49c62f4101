//! Worker pool for background jobs.
//!
//! Workers receive [`Job`]s over a crossbeam channel, run the engine or
//! drift detector, and report a [`JobResult`] back to the tick loop, which
//! is the sole writer of registry timestamps. A job failure never takes the
//! pool down; it is logged with the repo path and the next tick proceeds.

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::config::Config;
use crate::drift;
use crate::engine::{self, PushOutcome, SnapshotOutcome};
use crate::probe::SystemProbe;
use crate::reconcile;

use super::scheduler::JobKind;

/// One unit of background work, carrying the repo's resolved config.
#[derive(Debug, Clone)]
pub struct Job {
    pub repo: PathBuf,
    pub kind: JobKind,
    pub config: Config,
}

/// What the tick loop should record after a job.
#[derive(Debug)]
pub struct JobResult {
    pub repo: PathBuf,
    pub kind: JobKind,
    /// Bump the matching registry timestamp when set.
    pub record_at: Option<i64>,
    /// The repo path was proved gone; let registry pruning collect it.
    pub repo_vanished: bool,
}

/// Run jobs until the channel closes.
pub fn run_worker_loop(
    jobs: Receiver<Job>,
    results: Sender<JobResult>,
    probe: Arc<dyn SystemProbe>,
) {
    for job in jobs {
        let result = execute(&job, probe.as_ref());
        if results.send(result).is_err() {
            break;
        }
    }
}

fn execute(job: &Job, probe: &dyn SystemProbe) -> JobResult {
    let now = probe.now();
    let repo = job.repo.clone();

    let mut record_at = None;
    let mut repo_vanished = false;

    match job.kind {
        JobKind::Snapshot => match engine::snapshot(&repo, &job.config, probe, false) {
            Ok(SnapshotOutcome::Committed { ref_name, oid, .. }) => {
                tracing::debug!(repo = %repo.display(), %ref_name, %oid, "snapshot committed");
                record_at = Some(now);
            }
            Ok(SnapshotOutcome::NoChange) => {
                record_at = Some(now);
            }
            Ok(SnapshotOutcome::Skipped(reason)) => {
                tracing::debug!(repo = %repo.display(), ?reason, "snapshot skipped");
            }
            Err(e) if e.transience().is_retryable() => {
                tracing::info!(repo = %repo.display(), error = %e, "snapshot deferred");
            }
            Err(engine::EngineError::Blocked { reason }) => {
                // Blocked repos retry on the normal cadence, not every tick.
                tracing::warn!(repo = %repo.display(), %reason, "snapshot blocked");
                record_at = Some(now);
            }
            Err(engine::EngineError::Git(crate::git::GitError::NotARepo(_))) => {
                repo_vanished = true;
            }
            Err(e) => {
                tracing::error!(repo = %repo.display(), error = %e, "snapshot failed");
            }
        },

        JobKind::Push => {
            match engine::push_shadow(&repo, &job.config, probe, false) {
                Ok(PushOutcome::Pushed) => {}
                Ok(PushOutcome::NothingToPush) => {
                    tracing::debug!(repo = %repo.display(), "nothing to push");
                }
                Ok(PushOutcome::Deferred(why)) => {
                    tracing::info!(repo = %repo.display(), why, "push deferred");
                }
                Err(engine::EngineError::Git(crate::git::GitError::NotARepo(_))) => {
                    repo_vanished = true;
                }
                Err(e) => {
                    tracing::info!(repo = %repo.display(), error = %e, "push failed, will retry");
                }
            }
            // Every attempt consumes the push slot; retries come on the push
            // cadence so a dead network is not hammered each tick.
            if !repo_vanished {
                record_at = Some(now);
            }
        }

        JobKind::DriftCheck => {
            let machine_id = probe.machine_id();
            match crate::git::GitRepo::open(&repo) {
                Ok(git_repo) => {
                    match drift::poll(&git_repo, &job.config.core.remote_name, &machine_id, probe)
                    {
                        Ok(drift::DriftReport::Detected {
                            newest_machine, ..
                        }) => {
                            tracing::info!(repo = %repo.display(), %newest_machine, "drift detected");
                        }
                        Ok(drift::DriftReport::Quiet) => {}
                        Err(e) => {
                            tracing::info!(repo = %repo.display(), error = %e, "drift poll failed");
                        }
                    }
                    record_at = Some(now);
                }
                Err(_) => repo_vanished = true,
            }
        }

        JobKind::Maintenance => match reconcile::prune(&repo, probe) {
            Ok(outcome) if outcome.deleted > 0 => {
                tracing::info!(repo = %repo.display(), deleted = outcome.deleted, "retention prune");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(repo = %repo.display(), error = %e, "retention prune failed");
            }
        },
    }

    JobResult {
        repo,
        kind: job.kind,
        record_at,
        repo_vanished,
    }
}
