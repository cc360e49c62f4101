//! Cadence scheduling.
//!
//! Snapshot, push, and drift checks run on independent intervals per repo,
//! derived from the timestamps recorded in the registry. The daemon tick
//! asks [`Cadence::due`] what work a repo owes and enqueues exactly that.

use crate::config::Config;
use crate::registry::RepoEntry;

/// The three kinds of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Snapshot,
    Push,
    DriftCheck,
    /// Weekly retention pass.
    Maintenance,
}

/// Per-repo interval set, resolved from that repo's config cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub commit_interval: u64,
    pub push_interval: u64,
    pub drift_poll_interval: u64,
}

impl Cadence {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            commit_interval: cfg.daemon.commit_interval,
            push_interval: cfg.daemon.push_interval,
            drift_poll_interval: cfg.daemon.drift_poll_interval,
        }
    }

    /// Jobs a repo owes at `now`. Paused repos owe nothing.
    pub fn due(&self, entry: &RepoEntry, now: i64) -> Vec<JobKind> {
        if entry.paused {
            return Vec::new();
        }
        let mut due = Vec::new();
        if now.saturating_sub(entry.last_snapshot_at) >= self.commit_interval as i64 {
            due.push(JobKind::Snapshot);
        }
        if now.saturating_sub(entry.last_push_at) >= self.push_interval as i64 {
            due.push(JobKind::Push);
        }
        if now.saturating_sub(entry.last_drift_check_at) >= self.drift_poll_interval as i64 {
            due.push(JobKind::DriftCheck);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn entry(snapshot: i64, push: i64, drift: i64) -> RepoEntry {
        RepoEntry {
            path: PathBuf::from("/work/repo"),
            machine_id: "m1".into(),
            branch_at_register: Some("main".into()),
            paused: false,
            last_snapshot_at: snapshot,
            last_push_at: push,
            last_drift_check_at: drift,
        }
    }

    fn cadence() -> Cadence {
        Cadence {
            commit_interval: 600,
            push_interval: 3600,
            drift_poll_interval: 900,
        }
    }

    #[test]
    fn fresh_entry_owes_everything() {
        let due = cadence().due(&entry(0, 0, 0), 10_000);
        assert_eq!(
            due,
            vec![JobKind::Snapshot, JobKind::Push, JobKind::DriftCheck]
        );
    }

    #[test]
    fn cadences_are_independent() {
        let now = 10_000;
        // Snapshot done just now, push long overdue, drift fresh.
        let due = cadence().due(&entry(now, 0, now), now);
        assert_eq!(due, vec![JobKind::Push]);
    }

    #[test]
    fn boundary_is_inclusive() {
        let now = 10_000;
        let due = cadence().due(&entry(now - 600, now, now), now);
        assert_eq!(due, vec![JobKind::Snapshot]);

        let due = cadence().due(&entry(now - 599, now, now), now);
        assert!(due.is_empty());
    }

    #[test]
    fn paused_repo_owes_nothing() {
        let mut e = entry(0, 0, 0);
        e.paused = true;
        assert!(cadence().due(&e, 10_000).is_empty());
    }
}
