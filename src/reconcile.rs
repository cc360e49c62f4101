//! Reconciliation of shadow streams: sync, restore, finalize, prune.
//!
//! All of these run in the foreground. `finalize` folds every machine's
//! shadow stream into one squashed commit on the user branch via trivial
//! tree-level merges; content conflicts abort with a per-machine report
//! rather than attempting a textual merge.

use std::io::Write as _;
use std::path::Path;

use thiserror::Error;

use crate::config::Config;
use crate::drift::{self, DriftError};
use crate::error::{Effect, Transience};
use crate::git::{self, GitError, GitRepo, RefInfo};
use crate::lock::{RepoLock, RepoLockError};
use crate::paths;
use crate::probe::SystemProbe;

/// Shadow refs older than this are collected by `prune`.
pub const PRUNE_RETENTION_DAYS: i64 = 30;

/// Interval between background maintenance prunes.
pub const MAINTENANCE_INTERVAL_SECS: u64 = 7 * 86_400;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Drift(#[from] DriftError),

    #[error("working tree has uncommitted changes")]
    DirtyWorkingTree,

    #[error("HEAD is detached; check out a branch first")]
    DetachedHead,

    #[error("no shadow sessions found for this branch")]
    NoShadowRefs,

    #[error("already up to date with the newest session")]
    AlreadyUpToDate,

    #[error("canceled by user")]
    Canceled,

    #[error("'{path}' is not present in the latest snapshot")]
    NotInSnapshot { path: String },

    #[error("shadow streams share no ancestor with {branch}")]
    NoCommonAncestor { branch: String },

    #[error("conflicting paths across machines: {}", summarize_conflicts(.conflicts))]
    Conflicts { conflicts: Vec<(String, String)> },

    #[error("repository is busy with another pulsar operation")]
    LockHeld,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    pub fn transience(&self) -> Transience {
        match self {
            ReconcileError::Git(e) => e.transience(),
            ReconcileError::Drift(e) => e.transience(),
            ReconcileError::LockHeld | ReconcileError::DirtyWorkingTree => Transience::Retryable,
            ReconcileError::Io(_) => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            ReconcileError::Git(e) => e.effect(),
            ReconcileError::Io(_) => Effect::Unknown,
            // Conflicts and preflight failures abort before any ref moves.
            _ => Effect::None,
        }
    }
}

fn summarize_conflicts(conflicts: &[(String, String)]) -> String {
    conflicts
        .iter()
        .map(|(path, machine)| format!("{path} (from {machine})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// User-facing decisions; implemented over stdin for the real CLI and as
/// fixed scripts in tests.
pub trait Prompter {
    fn confirm(&mut self, message: &str) -> bool;
    fn negotiate(&mut self, path: &str) -> NegotiationChoice;
}

/// Choice points of the restore negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationChoice {
    Overwrite,
    ViewDiff,
    Cancel,
}

/// Stdin-backed prompter.
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&mut self, message: &str) -> bool {
        print!("{message} [y/N] ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        line.trim().eq_ignore_ascii_case("y")
    }

    fn negotiate(&mut self, path: &str) -> NegotiationChoice {
        loop {
            print!("'{path}' has uncommitted changes. [o]verwrite / [v]iew diff / [c]ancel: ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err() {
                return NegotiationChoice::Cancel;
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "o" => return NegotiationChoice::Overwrite,
                "v" => return NegotiationChoice::ViewDiff,
                "c" | "" => return NegotiationChoice::Cancel,
                _ => continue,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub machine: String,
    pub at_time: i64,
}

/// Adopt the newest cross-machine session into the working tree.
///
/// The user branch ref is left untouched; only the working tree and index
/// move, after explicit confirmation on a clean tree.
pub fn sync(
    repo_path: &Path,
    cfg: &Config,
    probe: &dyn SystemProbe,
    prompter: &mut dyn Prompter,
) -> Result<SyncOutcome, ReconcileError> {
    let repo = GitRepo::open(repo_path)?;
    let branch = repo.current_branch()?.ok_or(ReconcileError::DetachedHead)?;

    fetch_branch_namespace(&repo, cfg, &branch);

    let candidates = shadow_tips(&repo, &branch)?;
    let newest = candidates
        .iter()
        .max_by_key(|info| info.committed_at)
        .ok_or(ReconcileError::NoShadowRefs)?;

    if !repo.status_porcelain(None)?.is_empty() {
        return Err(ReconcileError::DirtyWorkingTree);
    }

    // A clean tree matches HEAD's tree, so tree equality means no drift.
    if repo.tree_of(&newest.name)? == repo.tree_of("HEAD")? {
        drift::acknowledge(repo.git_dir())?;
        return Err(ReconcileError::AlreadyUpToDate);
    }

    let machine = git::machine_of_ref(&newest.name)
        .unwrap_or("unknown")
        .to_string();
    let minutes = ((probe.now() - newest.committed_at).max(0)) / 60;
    if !prompter.confirm(&format!(
        "Overwrite working tree with the session from '{machine}' (~{minutes} min ago)?"
    )) {
        return Err(ReconcileError::Canceled);
    }

    repo.read_tree_update(&newest.name)?;
    drift::acknowledge(repo.git_dir())?;
    tracing::info!(repo = %repo_path.display(), %machine, "session synced");

    Ok(SyncOutcome {
        machine,
        at_time: newest.committed_at,
    })
}

/// Restore one path from this machine's latest shadow snapshot.
///
/// Dirty paths go through the negotiation loop: PROMPT → OVERWRITE, or
/// VIEW_DIFF back to PROMPT, or CANCEL with no mutation.
pub fn restore(
    repo_path: &Path,
    file: &str,
    force: bool,
    probe: &dyn SystemProbe,
    prompter: &mut dyn Prompter,
) -> Result<(), ReconcileError> {
    let repo = GitRepo::open(repo_path)?;
    let branch = repo.current_branch()?.ok_or(ReconcileError::DetachedHead)?;

    let ref_name = git::shadow_ref(&probe.machine_id(), &branch);
    let tip = repo
        .rev_parse(&ref_name)?
        .ok_or(ReconcileError::NoShadowRefs)?;

    if !repo.blob_exists(&tip, file)? {
        return Err(ReconcileError::NotInSnapshot {
            path: file.to_string(),
        });
    }

    let target = repo_path.join(file);
    let dirty = target.exists() && !repo.status_porcelain(Some(file))?.is_empty();
    if dirty && !force {
        loop {
            match prompter.negotiate(file) {
                NegotiationChoice::Overwrite => break,
                NegotiationChoice::ViewDiff => {
                    println!("{}", repo.diff_path(&tip, file)?);
                }
                NegotiationChoice::Cancel => return Err(ReconcileError::Canceled),
            }
        }
    }

    let blob = repo.read_blob(&tip, file)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, blob)?;
    tracing::info!(repo = %repo_path.display(), %file, "restored from {ref_name}");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub commit: String,
    /// (machine, files contributed), lexicographic by machine.
    pub contributions: Vec<(String, usize)>,
}

/// Octopus squash: fold every machine's shadow stream for the current
/// branch into one commit on the user branch.
///
/// Parents are the prior branch tip followed by the shadow tips in
/// lexicographic machine order, so the history is deterministic. Conflicts
/// abort before the branch ref moves.
pub fn finalize(
    repo_path: &Path,
    cfg: &Config,
    prompter: &mut dyn Prompter,
) -> Result<FinalizeOutcome, ReconcileError> {
    let repo = GitRepo::open(repo_path)?;
    let branch = repo.current_branch()?.ok_or(ReconcileError::DetachedHead)?;

    if !repo.status_porcelain(None)?.is_empty() {
        return Err(ReconcileError::DirtyWorkingTree);
    }

    let _lock = match RepoLock::try_acquire(repo.git_dir()) {
        Ok(lock) => lock,
        Err(RepoLockError::Held { .. }) => return Err(ReconcileError::LockHeld),
        Err(e) => return Err(ReconcileError::Io(std::io::Error::other(e.to_string()))),
    };

    fetch_all_namespace(&repo, cfg, &branch);

    let mut tips = shadow_tips(&repo, &branch)?;
    if tips.is_empty() {
        return Err(ReconcileError::NoShadowRefs);
    }
    // Deterministic parent order.
    tips.sort_by(|a, b| machine_of(a).cmp(&machine_of(b)));

    let prior = repo
        .rev_parse(&format!("refs/heads/{branch}"))?
        .ok_or(ReconcileError::DetachedHead)?;

    let mut base_args: Vec<&str> = vec![prior.as_str()];
    base_args.extend(tips.iter().map(|t| t.oid.as_str()));
    let base = repo
        .merge_base_octopus(&base_args)?
        .ok_or_else(|| ReconcileError::NoCommonAncestor {
            branch: branch.clone(),
        })?;

    // Fold tip trees into an isolated index, one trivial 3-way merge per
    // machine. Unmerged entries mean real content conflicts: abort with the
    // owning machine named per path.
    let index_path = paths::shadow_index_path(repo.git_dir());
    let _ = std::fs::remove_file(&index_path);
    let fold = fold_tips(&repo, &index_path, &prior, &base, &tips);
    let _ = std::fs::remove_file(&index_path);
    let merged_tree = fold?;

    if Some(merged_tree.as_str()) == repo.tree_of(&prior)?.as_deref() {
        return Err(ReconcileError::AlreadyUpToDate);
    }

    let mut contributions = Vec::new();
    for tip in &tips {
        let files = repo.changed_paths(&base, &tip.oid)?.len();
        contributions.push((machine_of(tip), files));
    }

    if !prompter.confirm(&format!(
        "Fold {} session stream(s) into '{branch}'?",
        tips.len()
    )) {
        return Err(ReconcileError::Canceled);
    }

    let mut message = format!("pulsar: finalize {} session(s) into {branch}\n", tips.len());
    for (machine, files) in &contributions {
        message.push_str(&format!("\n{machine}: {files} file(s)"));
    }

    let mut parents: Vec<&str> = vec![prior.as_str()];
    parents.extend(tips.iter().map(|t| t.oid.as_str()));
    let commit = repo.commit_tree(&merged_tree, &parents, &message)?;
    repo.update_ref_cas(&format!("refs/heads/{branch}"), &commit, Some(&prior))?;

    // Bring the checked-out tree up to the new branch tip.
    repo.read_tree_update(&commit)?;

    let reconciled: Vec<(String, String)> = tips
        .iter()
        .map(|t| (t.name.clone(), t.oid.clone()))
        .collect();
    drift::mark_reconciled(repo.git_dir(), &reconciled, &commit)?;

    tracing::info!(repo = %repo_path.display(), %commit, streams = tips.len(), "finalized");
    Ok(FinalizeOutcome {
        commit,
        contributions,
    })
}

fn fold_tips(
    repo: &GitRepo,
    index_path: &Path,
    prior: &str,
    base: &str,
    tips: &[RefInfo],
) -> Result<String, ReconcileError> {
    repo.read_tree_shadow(prior, index_path)?;
    let mut acc_tree = repo
        .tree_of(prior)?
        .ok_or_else(|| GitError::BrokenRef {
            ref_name: prior.to_string(),
            oid: prior.to_string(),
        })?;

    for tip in tips {
        repo.read_tree_merge_shadow(base, &acc_tree, &tip.oid, index_path)?;
        let unmerged = repo.unmerged_paths_shadow(index_path)?;
        if !unmerged.is_empty() {
            let machine = machine_of(tip);
            return Err(ReconcileError::Conflicts {
                conflicts: unmerged
                    .into_iter()
                    .map(|path| (path, machine.clone()))
                    .collect(),
            });
        }
        acc_tree = repo.write_tree_shadow(index_path)?;
    }
    Ok(acc_tree)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneOutcome {
    pub deleted: usize,
}

/// Delete shadow refs older than the retention window, plus refs already
/// folded into the user branch by `finalize`.
pub fn prune(repo_path: &Path, probe: &dyn SystemProbe) -> Result<PruneOutcome, ReconcileError> {
    let repo = GitRepo::open(repo_path)?;
    let cutoff = probe.now() - PRUNE_RETENTION_DAYS * 86_400;

    let mut state = drift::DriftState::load(repo.git_dir())?;
    let refs = repo.list_refs(&format!("refs/heads/{}/*", git::SHADOW_NAMESPACE))?;

    let mut deleted = 0;
    for info in refs {
        let aged_out = info.committed_at < cutoff;
        let reconciled = state.reconciled.contains_key(&info.name);
        if !aged_out && !reconciled {
            continue;
        }
        match repo.delete_ref(&info.name, Some(&info.oid)) {
            Ok(()) => {
                state.reconciled.remove(&info.name);
                deleted += 1;
                tracing::info!(ref_name = %info.name, aged_out, reconciled, "pruned shadow ref");
            }
            Err(e) => {
                // A racing snapshot moved the ref; it is live again.
                tracing::debug!(ref_name = %info.name, error = %e, "prune skipped");
            }
        }
    }

    if deleted > 0 {
        state.save(repo.git_dir())?;
        repo.gc_auto()?;
    }
    Ok(PruneOutcome { deleted })
}

/// Whether the weekly maintenance prune is due.
pub fn maintenance_due() -> bool {
    let path = paths::last_prune_path();
    match std::fs::metadata(&path).and_then(|m| m.modified()) {
        Ok(mtime) => mtime
            .elapsed()
            .map(|age| age.as_secs() >= MAINTENANCE_INTERVAL_SECS)
            .unwrap_or(false),
        Err(_) => true,
    }
}

/// Stamp the maintenance clock.
pub fn touch_last_prune() {
    let path = paths::last_prune_path();
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let _ = std::fs::write(&path, b"");
}

fn machine_of(info: &RefInfo) -> String {
    git::machine_of_ref(&info.name)
        .unwrap_or("unknown")
        .to_string()
}

/// All live shadow tips for one branch, broken refs excluded.
fn shadow_tips(repo: &GitRepo, branch: &str) -> Result<Vec<RefInfo>, ReconcileError> {
    Ok(repo
        .list_refs(&git::shadow_ref_glob(branch))?
        .into_iter()
        .filter(|info| !info.name.ends_with(".broken"))
        .collect())
}

/// Branch-scoped fetch of every machine's stream; offline is tolerated
/// since the local cache may already hold what we need.
// Fetch refspecs are unforced: this machine's own segment may be ahead of
// the remote and must never be clobbered by a poll.
fn fetch_branch_namespace(repo: &GitRepo, cfg: &Config, branch: &str) {
    let enc = git::encode_branch(branch);
    let refspec = format!(
        "refs/heads/{ns}/*/{enc}:refs/heads/{ns}/*/{enc}",
        ns = git::SHADOW_NAMESPACE
    );
    if let Err(e) = repo.fetch(&cfg.core.remote_name, &refspec) {
        tracing::warn!(error = %e, "fetch incomplete, using local cache");
    }
}

fn fetch_all_namespace(repo: &GitRepo, cfg: &Config, branch: &str) {
    let refspec = format!(
        "refs/heads/{ns}/*:refs/heads/{ns}/*",
        ns = git::SHADOW_NAMESPACE
    );
    if let Err(e) = repo.fetch(&cfg.core.remote_name, &refspec) {
        tracing::warn!(error = %e, branch, "fetch incomplete, folding local refs only");
    }
}
