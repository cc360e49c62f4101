//! Roaming radar: detect newer shadow streams pushed by other machines.
//!
//! Poll results are cached in `.git/pulsar_drift_state` so `status` can
//! render the drift banner without ever touching the network. The cache is
//! rewritten atomically; writers hold a flock for the rewrite window only.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Effect, Transience};
use crate::git::{self, GitError, GitRepo};
use crate::paths;
use crate::probe::SystemProbe;

#[derive(Debug, Error)]
pub enum DriftError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error("failed to read drift state {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("drift state corrupted at {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write drift state {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DriftError {
    pub fn transience(&self) -> Transience {
        match self {
            DriftError::Git(e) => e.transience(),
            DriftError::Read { .. } | DriftError::Write { .. } => Transience::Retryable,
            DriftError::Corrupt { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

/// Cached cross-machine drift facts for one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftState {
    /// Machines whose shadow refs have been observed on the remote.
    pub observed_machines: Vec<String>,
    /// Tip of the newest foreign shadow ref seen.
    pub latest_shadow_sha_seen: Option<String>,
    /// Commit time of that tip, unix seconds.
    pub at_time: i64,
    /// Whether the user has dismissed the current drift banner.
    pub acknowledged: bool,
    /// Large-file (or similar) blocker currently vetoing snapshots.
    pub blocked: Option<String>,
    /// Shadow refs folded into the user branch: ref name → merged commit.
    pub reconciled: BTreeMap<String, String>,
}

impl DriftState {
    /// Read the cache; a missing file means no drift observed yet.
    ///
    /// This is the only read path `status` uses — it never invokes the
    /// network.
    pub fn load(git_dir: &Path) -> Result<Self, DriftError> {
        let path = paths::drift_state_path(git_dir);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(DriftError::Read { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| DriftError::Corrupt { path, source })
    }

    /// Atomically replace the cache, holding the writer flock for the
    /// rewrite window only.
    pub fn save(&self, git_dir: &Path) -> Result<(), DriftError> {
        let path = paths::drift_state_path(git_dir);
        let write_err = |source| DriftError::Write {
            path: path.clone(),
            source,
        };

        let _guard = writer_lock(git_dir).map_err(write_err)?;

        let dir = path
            .parent()
            .ok_or_else(|| write_err(std::io::Error::other("state path has no parent")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        let json = serde_json::to_vec(self).map_err(|source| DriftError::Corrupt {
            path: path.clone(),
            source,
        })?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

/// Blocking exclusive flock guarding drift-state rewrites. Readers never
/// take it; the window is one temp-write plus rename.
fn writer_lock(git_dir: &Path) -> std::io::Result<Flock<std::fs::File>> {
    let lock_path = git_dir.join("pulsar_drift_state.lock");
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;
    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| std::io::Error::from_raw_os_error(errno as i32))
}

/// Outcome of one drift poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftReport {
    /// No foreign shadow ref is newer than what was already recorded.
    Quiet,
    /// Newer foreign activity; state rewritten, notification emitted.
    Detected {
        machines: Vec<String>,
        newest_machine: String,
        newest_at: i64,
    },
}

/// Fetch the shadow namespace and refresh the drift cache.
///
/// Detection compares foreign tip commit times against the cached
/// `at_time`, so a machine is only announced once per leapfrog.
pub fn poll(
    repo: &GitRepo,
    remote: &str,
    machine_id: &str,
    probe: &dyn SystemProbe,
) -> Result<DriftReport, DriftError> {
    // Unforced on purpose: our own segment may be ahead of the remote and
    // must never be clobbered. A partial fetch (or none, offline) still
    // leaves usable local refs to enumerate.
    let refspec = format!(
        "refs/heads/{ns}/*:refs/heads/{ns}/*",
        ns = git::SHADOW_NAMESPACE
    );
    if let Err(e) = repo.fetch(remote, &refspec) {
        tracing::debug!(error = %e, "drift fetch incomplete, reading local refs");
    }

    let refs = repo.list_refs(&format!("refs/heads/{}/*", git::SHADOW_NAMESPACE))?;

    let mut state = DriftState::load(repo.git_dir())?;
    let mut machines: Vec<String> = Vec::new();
    let mut newest: Option<(String, String, i64)> = None;

    for info in &refs {
        let Some(machine) = git::machine_of_ref(&info.name) else {
            continue;
        };
        if machine == machine_id || info.name.ends_with(".broken") {
            continue;
        }
        if !machines.iter().any(|m| m == machine) {
            machines.push(machine.to_string());
        }
        if info.committed_at > state.at_time
            && newest.as_ref().is_none_or(|(_, _, t)| info.committed_at > *t)
        {
            newest = Some((machine.to_string(), info.oid.clone(), info.committed_at));
        }
    }
    machines.sort();

    let Some((newest_machine, newest_sha, newest_at)) = newest else {
        if machines != state.observed_machines {
            state.observed_machines = machines;
            state.save(repo.git_dir())?;
        }
        return Ok(DriftReport::Quiet);
    };

    state.observed_machines = machines.clone();
    state.latest_shadow_sha_seen = Some(newest_sha);
    state.at_time = newest_at;
    state.acknowledged = false;
    state.save(repo.git_dir())?;

    let minutes = ((probe.now() - newest_at).max(0)) / 60;
    probe.notify(
        "Pulsar drift",
        &format!("'{newest_machine}' pushed a newer session ~{minutes} min ago. Run 'git-pulsar sync' to pick it up."),
    );

    Ok(DriftReport::Detected {
        machines,
        newest_machine,
        newest_at,
    })
}

/// Dismiss the current drift banner (`sync` succeeded or `status` shown).
pub fn acknowledge(git_dir: &Path) -> Result<(), DriftError> {
    let mut state = DriftState::load(git_dir)?;
    if !state.acknowledged {
        state.acknowledged = true;
        state.save(git_dir)?;
    }
    Ok(())
}

/// Record a snapshot blocker. Returns `true` when the blocker is new, so
/// callers notify exactly once per distinct condition.
pub fn set_blocked(git_dir: &Path, reason: &str) -> Result<bool, DriftError> {
    let mut state = DriftState::load(git_dir)?;
    if state.blocked.as_deref() == Some(reason) {
        return Ok(false);
    }
    state.blocked = Some(reason.to_string());
    state.save(git_dir)?;
    Ok(true)
}

/// Clear the blocker after a snapshot goes through again.
pub fn clear_blocked(git_dir: &Path) -> Result<(), DriftError> {
    let mut state = DriftState::load(git_dir)?;
    if state.blocked.is_some() {
        state.blocked = None;
        state.save(git_dir)?;
    }
    Ok(())
}

/// Mark shadow refs as folded into `merged_oid`; prune may collect them.
pub fn mark_reconciled(
    git_dir: &Path,
    refs: &[(String, String)],
    merged_oid: &str,
) -> Result<(), DriftError> {
    let mut state = DriftState::load(git_dir)?;
    for (ref_name, _tip) in refs {
        state
            .reconciled
            .insert(ref_name.clone(), merged_oid.to_string());
    }
    state.save(git_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_state_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = DriftState::load(dir.path()).expect("load");
        assert_eq!(state, DriftState::default());
        assert!(!state.acknowledged);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut state = DriftState::default();
        state.observed_machines = vec!["m1".into(), "m2".into()];
        state.latest_shadow_sha_seen = Some("abc123".into());
        state.at_time = 1_700_000_000;
        state.acknowledged = false;
        state.save(dir.path()).expect("save");

        let loaded = DriftState::load(dir.path()).expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn blocker_notifies_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(set_blocked(dir.path(), "big.bin over threshold").expect("set"));
        assert!(!set_blocked(dir.path(), "big.bin over threshold").expect("again"));
        assert!(set_blocked(dir.path(), "other.bin over threshold").expect("changed"));

        clear_blocked(dir.path()).expect("clear");
        let state = DriftState::load(dir.path()).expect("load");
        assert!(state.blocked.is_none());
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut state = DriftState::default();
        state.at_time = 5;
        state.save(dir.path()).expect("save");

        acknowledge(dir.path()).expect("ack");
        acknowledge(dir.path()).expect("ack again");
        assert!(DriftState::load(dir.path()).expect("load").acknowledged);
    }
}
