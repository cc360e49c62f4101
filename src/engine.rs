//! Shadow snapshot engine.
//!
//! Captures the working tree into `refs/heads/wip/pulsar/<machine>/<branch>`
//! through an isolated index, leaving the user's index, staged changes, and
//! visible branches untouched. Ref updates are compare-and-swap so a racing
//! writer loses cleanly instead of clobbering.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::Config;
use crate::drift;
use crate::error::{Effect, Transience};
use crate::git::{self, DiffStat, GitError, GitRepo};
use crate::lock::{RepoLock, RepoLockError};
use crate::paths;
use crate::probe::SystemProbe;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Drift(#[from] drift::DriftError),

    #[error("snapshot blocked: {reason}")]
    Blocked { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn transience(&self) -> Transience {
        match self {
            EngineError::Git(e) => e.transience(),
            EngineError::Drift(e) => e.transience(),
            // A blocker clears only when the user changes the repo.
            EngineError::Blocked { .. } => Transience::Permanent,
            EngineError::Io(_) => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            EngineError::Git(e) => e.effect(),
            EngineError::Drift(_) | EngineError::Blocked { .. } => Effect::None,
            EngineError::Io(_) => Effect::Unknown,
        }
    }
}

/// Why a snapshot cycle did no work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Another writer holds the repo lock.
    LockHeld,
    /// A git operation is in flight in the working tree.
    Busy(&'static str),
    /// Background cycle deferred while the host is under load.
    UnderLoad,
    /// Background cycle deferred below the snapshot battery floor.
    BatteryLow,
    /// Repository has no commits yet; nothing to parent a snapshot on.
    EmptyRepo,
}

/// Result of one snapshot cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// New shadow commit written.
    Committed {
        ref_name: String,
        oid: String,
        stat: DiffStat,
    },
    /// Working tree identical to the previous snapshot.
    NoChange,
    Skipped(SkipReason),
}

/// Result of one push attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Nothing on this machine's shadow namespace yet.
    NothingToPush,
    Deferred(&'static str),
}

/// Run one snapshot cycle for `repo_path`.
///
/// `interactive` bypasses the background-only gates (load, battery floor)
/// so `git-pulsar now` always captures.
pub fn snapshot(
    repo_path: &Path,
    cfg: &Config,
    probe: &dyn SystemProbe,
    interactive: bool,
) -> Result<SnapshotOutcome, EngineError> {
    let repo = GitRepo::open(repo_path)?;

    let _lock = match RepoLock::try_acquire(repo.git_dir()) {
        Ok(lock) => lock,
        Err(RepoLockError::Held { .. }) => return Ok(SnapshotOutcome::Skipped(SkipReason::LockHeld)),
        Err(e) => {
            return Err(EngineError::Io(std::io::Error::other(e.to_string())));
        }
    };

    if let Some(marker) = repo.busy_reason() {
        if marker.ends_with("(stale)") {
            tracing::warn!(repo = %repo_path.display(), "stale index.lock, remove it manually");
            probe.notify("Pulsar warning", &format!("Stale lock in {}", repo_name(repo_path)));
        }
        return Ok(SnapshotOutcome::Skipped(SkipReason::Busy(marker)));
    }

    if !interactive {
        if probe.under_load() {
            return Ok(SnapshotOutcome::Skipped(SkipReason::UnderLoad));
        }
        let (percent, plugged) = probe.battery();
        if !plugged && percent < cfg.daemon.min_battery_percent {
            return Ok(SnapshotOutcome::Skipped(SkipReason::BatteryLow));
        }
    }

    let machine_id = probe.machine_id();

    let Some(branch) = repo.current_branch()? else {
        let reason = "detached HEAD".to_string();
        if drift::set_blocked(repo.git_dir(), &reason)? {
            probe.notify(
                "Pulsar blocked",
                &format!("{}: snapshots need a checked-out branch", repo_name(repo_path)),
            );
        }
        return Err(EngineError::Blocked { reason });
    };

    let Some(head) = repo.rev_parse("HEAD")? else {
        // Unborn branch: nothing to snapshot against yet.
        return Ok(SnapshotOutcome::Skipped(SkipReason::EmptyRepo));
    };

    // Large-file gate: the offending file is neither staged nor skipped —
    // the whole cycle aborts so the snapshot never lies by omission.
    let threshold = cfg.limits.large_file_threshold;
    for candidate in repo.snapshot_candidates()? {
        let full = repo_path.join(&candidate);
        let Ok(meta) = full.symlink_metadata() else {
            continue;
        };
        if meta.is_file() && meta.len() > threshold {
            let reason = format!(
                "{} is {} bytes (limit {})",
                candidate.display(),
                meta.len(),
                threshold
            );
            if drift::set_blocked(repo.git_dir(), &reason)? {
                probe.notify(
                    "Pulsar snapshot aborted",
                    &format!(
                        "File over {}MB detected: {}",
                        threshold / (1024 * 1024),
                        candidate.display()
                    ),
                );
            }
            tracing::warn!(repo = %repo_path.display(), %reason, "large file veto");
            return Err(EngineError::Blocked { reason });
        }
    }

    // Stage into the isolated index; the file is transient and recreated
    // from scratch so the tree is exactly the current working tree.
    let index_path = paths::shadow_index_path(repo.git_dir());
    let _ = std::fs::remove_file(&index_path);
    let staged = repo
        .stage_all_shadow(&index_path, &cfg.files.ignore)
        .and_then(|_| repo.write_tree_shadow(&index_path));
    let _ = std::fs::remove_file(&index_path);
    let tree = staged?;

    let ref_name = git::shadow_ref(&machine_id, &branch);
    let parent = resolve_shadow_tip(&repo, &ref_name)?;

    if let Some(prev) = &parent
        && repo.tree_of(prev)?.as_deref() == Some(tree.as_str())
    {
        drift::clear_blocked(repo.git_dir())?;
        return Ok(SnapshotOutcome::NoChange);
    }

    let base = parent.clone().unwrap_or(head);
    let stat = repo.diff_shortstat(&base, &tree)?;
    let stamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".into());
    let message = format!(
        "pulsar: {machine_id} @ {stamp} ({} files, +{}/-{})",
        stat.files_changed, stat.insertions, stat.deletions
    );

    let commit = repo.commit_tree(&tree, &[&base], &message)?;
    repo.update_ref_cas(&ref_name, &commit, parent.as_deref())?;
    drift::clear_blocked(repo.git_dir())?;

    tracing::info!(repo = %repo_path.display(), %ref_name, oid = %commit, "shadow snapshot");
    Ok(SnapshotOutcome::Committed {
        ref_name,
        oid: commit,
        stat,
    })
}

/// Resolve the shadow ref tip, quarantining it when it points at a missing
/// object so one corrupt ref cannot wedge the cycle forever.
fn resolve_shadow_tip(repo: &GitRepo, ref_name: &str) -> Result<Option<String>, EngineError> {
    let Some(oid) = repo.rev_parse(ref_name)? else {
        return Ok(None);
    };
    if repo.object_exists(&oid)? {
        return Ok(Some(oid));
    }
    tracing::error!(%ref_name, %oid, "shadow ref target missing, quarantining");
    repo.quarantine_ref(ref_name, &oid)?;
    Ok(None)
}

/// Push this machine's shadow namespace on its own cadence.
pub fn push_shadow(
    repo_path: &Path,
    cfg: &Config,
    probe: &dyn SystemProbe,
    interactive: bool,
) -> Result<PushOutcome, EngineError> {
    let repo = GitRepo::open(repo_path)?;
    let machine_id = probe.machine_id();

    // Eco mode: a battery exactly at the floor still pushes.
    if !interactive {
        let (percent, plugged) = probe.battery();
        if !plugged && percent < cfg.daemon.eco_mode_percent {
            return Ok(PushOutcome::Deferred("eco mode"));
        }
    }

    let glob = format!("refs/heads/{}/{}/*", git::SHADOW_NAMESPACE, machine_id);
    if repo.list_refs(&glob)?.is_empty() {
        return Ok(PushOutcome::NothingToPush);
    }

    let remote = &cfg.core.remote_name;
    if let Some(host) = repo.remote_url(remote)?.as_deref().and_then(remote_host)
        && !host_reachable(&host)
    {
        return Ok(PushOutcome::Deferred("offline"));
    }

    // Force-push is confined to this machine's own segment; other machines'
    // refs are never eligible.
    let refspec = format!(
        "+refs/heads/{ns}/{m}/*:refs/heads/{ns}/{m}/*",
        ns = git::SHADOW_NAMESPACE,
        m = machine_id
    );
    repo.push(remote, &refspec)?;
    tracing::info!(repo = %repo_path.display(), "shadow refs pushed");
    Ok(PushOutcome::Pushed)
}

/// Hostname of an SSH (`git@host:path`) or URL-style remote. Local paths
/// yield `None` and are always treated as reachable.
fn remote_host(url: &str) -> Option<String> {
    if let Some((_, rest)) = url.split_once('@') {
        let host = rest.split([':', '/']).next()?;
        return (!host.is_empty()).then(|| host.to_string());
    }
    if let Some((_, rest)) = url.split_once("://") {
        let host = rest.split('/').next()?;
        return (!host.is_empty()).then(|| host.to_string());
    }
    None
}

/// Quick TCP probe on 443 then 22.
fn host_reachable(host: &str) -> bool {
    for port in [443u16, 22] {
        let Ok(addrs) = (host, port).to_socket_addrs() else {
            continue;
        };
        for addr in addrs {
            if TcpStream::connect_timeout(&addr, Duration::from_secs(3)).is_ok() {
                return true;
            }
        }
    }
    false
}

fn repo_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
