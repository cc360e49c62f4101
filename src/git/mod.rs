//! Git subprocess boundary.
//!
//! Every write goes through plumbing (`write-tree`, `commit-tree`,
//! `update-ref`, `read-tree`, `fetch`, `push`); porcelain never touches the
//! user's index, worktree, or refs. Shadow snapshots stage through an
//! isolated index selected via `GIT_INDEX_FILE`, so user-visible state is
//! byte-identical across snapshot cycles. Shadow commits stay reachable
//! through their refs and survive a user-initiated `git gc`.

mod error;
mod plumbing;

pub use error::GitError;
pub use plumbing::{DiffStat, GitRepo, RefInfo, decode_branch, encode_branch};

/// Reserved ref namespace for shadow snapshots.
///
/// Full layout: `refs/heads/wip/pulsar/<machine-id>/<branch>`.
pub const SHADOW_NAMESPACE: &str = "wip/pulsar";

/// Fully qualified shadow ref for a machine/branch pair.
///
/// The branch component is encoded so branch names containing `/` occupy a
/// single path segment.
pub fn shadow_ref(machine_id: &str, branch: &str) -> String {
    format!(
        "refs/heads/{}/{}/{}",
        SHADOW_NAMESPACE,
        machine_id,
        encode_branch(branch)
    )
}

/// Glob matching every machine's shadow ref for one branch.
pub fn shadow_ref_glob(branch: &str) -> String {
    format!(
        "refs/heads/{}/*/{}",
        SHADOW_NAMESPACE,
        encode_branch(branch)
    )
}

/// Extract the machine segment from a fully qualified shadow ref.
pub fn machine_of_ref(ref_name: &str) -> Option<&str> {
    let rest = ref_name.strip_prefix("refs/heads/")?;
    let rest = rest.strip_prefix(SHADOW_NAMESPACE)?.strip_prefix('/')?;
    rest.split('/').next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_ref_layout() {
        assert_eq!(
            shadow_ref("mbp-a1b2c3d4", "main"),
            "refs/heads/wip/pulsar/mbp-a1b2c3d4/main"
        );
    }

    #[test]
    fn slashed_branches_stay_one_segment() {
        let r = shadow_ref("m1", "feature/login");
        assert_eq!(r, "refs/heads/wip/pulsar/m1/feature%2Flogin");
        assert_eq!(machine_of_ref(&r), Some("m1"));
    }

    #[test]
    fn machine_extraction_rejects_foreign_refs() {
        assert_eq!(machine_of_ref("refs/heads/main"), None);
        assert_eq!(
            machine_of_ref("refs/heads/wip/pulsar/m2/main"),
            Some("m2")
        );
    }
}
