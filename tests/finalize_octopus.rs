//! Octopus finalize across three simulated machines.

mod common;

use std::path::Path;

use common::{Fixture, git_in, rev_parse, shadow_ref};
use tempfile::TempDir;

/// Run `now` in `dir` pretending to be `machine`, then clean the worktree.
fn snapshot_as(fx: &Fixture, dir: &Path, machine: &str, file: &str, contents: &str) {
    let state = TempDir::new().expect("state dir");
    std::fs::write(state.path().join("machine_id"), machine).expect("seed id");

    std::fs::write(dir.join(file), contents).expect("write edit");
    fx.pulsar()
        .current_dir(dir)
        .env("PULSAR_STATE_DIR", state.path())
        .arg("now")
        .assert()
        .success();

    // Leave a clean tree behind, as a user would after switching machines.
    git_in(dir, &["checkout", "--", "."]);
    git_in(dir, &["clean", "-fd"]);
}

#[test]
fn finalize_unions_three_machines_into_one_commit() {
    let fx = Fixture::new();

    let clone_b = fx.clone_repo();
    let clone_c = fx.clone_repo();

    snapshot_as(&fx, fx.repo(), "m1-aaaa", "from_m1.txt", "one\n");
    snapshot_as(&fx, clone_b.path(), "m3-cccc", "from_m3.txt", "three\n");
    snapshot_as(&fx, clone_c.path(), "m2-bbbb", "from_m2.txt", "two\n");

    let prior = rev_parse(fx.repo(), "refs/heads/main").expect("main tip");

    fx.seed_machine_id("m1-aaaa");
    fx.pulsar().args(["finalize", "--yes"]).assert().success();

    let merged = rev_parse(fx.repo(), "refs/heads/main").expect("main moved");
    assert_ne!(merged, prior);

    // Four parents: prior tip, then machine tips in lexicographic order.
    let parents = fx.git(&["log", "--format=%P", "-1", &merged]);
    let parents: Vec<&str> = parents.split_whitespace().collect();
    assert_eq!(parents.len(), 4, "parents: {parents:?}");
    assert_eq!(parents[0], prior);
    let m1 = rev_parse(fx.repo(), &shadow_ref("m1-aaaa", "main")).expect("m1 tip");
    let m2 = rev_parse(fx.repo(), &shadow_ref("m2-bbbb", "main")).expect("m2 tip");
    let m3 = rev_parse(fx.repo(), &shadow_ref("m3-cccc", "main")).expect("m3 tip");
    assert_eq!(parents[1..], [m1.as_str(), m2.as_str(), m3.as_str()]);

    // The tree is the union of all three edits, with no conflict markers.
    let listing = fx.git(&["ls-tree", "-r", "--name-only", &merged]);
    for file in ["from_m1.txt", "from_m2.txt", "from_m3.txt", "README.md"] {
        assert!(listing.lines().any(|l| l == file), "missing {file}: {listing}");
    }
    for file in ["from_m1.txt", "from_m2.txt", "from_m3.txt"] {
        let on_disk = std::fs::read_to_string(fx.repo().join(file)).expect("read merged file");
        assert!(!on_disk.contains("<<<<<<<"), "conflict markers in {file}");
    }

    // The message names every contributing machine.
    let message = fx.git(&["log", "--format=%B", "-1", &merged]);
    for machine in ["m1-aaaa", "m2-bbbb", "m3-cccc"] {
        assert!(message.contains(machine), "message: {message}");
    }
}

#[test]
fn conflicting_streams_abort_with_exit_three() {
    let fx = Fixture::new();
    let clone_b = fx.clone_repo();

    snapshot_as(&fx, fx.repo(), "m1-aaaa", "shared.txt", "from m1\n");
    snapshot_as(&fx, clone_b.path(), "m2-bbbb", "shared.txt", "from m2\n");

    let prior = rev_parse(fx.repo(), "refs/heads/main").expect("main tip");

    fx.seed_machine_id("m1-aaaa");
    fx.pulsar()
        .args(["finalize", "--yes"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicates::str::contains("shared.txt"));

    // The branch never moved and the worktree is pristine.
    assert_eq!(rev_parse(fx.repo(), "refs/heads/main"), Some(prior));
    assert_eq!(fx.git(&["status", "--porcelain"]), "");
}

#[test]
fn finalize_requires_a_clean_tree() {
    let fx = Fixture::new();
    snapshot_as(&fx, fx.repo(), "m1-aaaa", "work.txt", "draft\n");

    std::fs::write(fx.repo().join("dirty.txt"), "uncommitted\n").expect("write dirty");
    fx.seed_machine_id("m1-aaaa");
    fx.pulsar()
        .args(["finalize", "--yes"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicates::str::contains("uncommitted"));
}

#[test]
fn finalized_refs_are_marked_for_prune() {
    let fx = Fixture::new();
    snapshot_as(&fx, fx.repo(), "m1-aaaa", "work.txt", "draft\n");

    fx.seed_machine_id("m1-aaaa");
    fx.pulsar().args(["finalize", "--yes"]).assert().success();

    let ref_name = shadow_ref("m1-aaaa", "main");
    assert!(rev_parse(fx.repo(), &ref_name).is_some(), "ref survives finalize");

    // Eager prune collects reconciled refs immediately.
    fx.pulsar().arg("prune").assert().success();
    assert_eq!(rev_parse(fx.repo(), &ref_name), None);
}
