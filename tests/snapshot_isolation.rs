//! End-to-end: snapshots never disturb the user's git state.

mod common;

use common::{Fixture, read_index_bytes, rev_parse, shadow_ref};

#[test]
fn snapshot_leaves_staged_changes_untouched() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");

    // Stage a file without committing it.
    std::fs::write(fx.repo().join("a.py"), "print('hi')\n").expect("write a.py");
    fx.git(&["add", "a.py"]);
    let staged_before = fx.git(&["diff", "--cached"]);
    let index_before = read_index_bytes(fx.repo());

    fx.pulsar().arg("now").assert().success();

    // The user's staged view is byte-identical.
    assert_eq!(fx.git(&["diff", "--cached"]), staged_before);
    assert_eq!(read_index_bytes(fx.repo()), index_before);

    // The shadow ref exists and its tree contains the staged file.
    let ref_name = shadow_ref("m1-aaaa", "main");
    let tip = rev_parse(fx.repo(), &ref_name).expect("shadow ref exists");
    let listing = fx.git(&["ls-tree", "-r", "--name-only", &tip]);
    assert!(listing.lines().any(|l| l == "a.py"), "tree: {listing}");
}

#[test]
fn snapshot_does_not_touch_user_branches() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");

    let main_before = rev_parse(fx.repo(), "refs/heads/main").expect("main exists");
    std::fs::write(fx.repo().join("wip.txt"), "draft\n").expect("write wip");

    fx.pulsar().arg("now").assert().success();

    assert_eq!(
        rev_parse(fx.repo(), "refs/heads/main"),
        Some(main_before),
        "user branch must not move"
    );
    // The transient index is cleaned up between cycles.
    assert!(!fx.repo().join(".git/pulsar_index").exists());
}

#[test]
fn busy_repo_skips_with_exit_one() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");

    std::fs::create_dir(fx.repo().join(".git/rebase-merge")).expect("simulate rebase");
    std::fs::write(fx.repo().join("wip.txt"), "draft\n").expect("write wip");
    let index_before = read_index_bytes(fx.repo());

    fx.pulsar()
        .arg("now")
        .assert()
        .failure()
        .code(1)
        .stderr(predicates::str::contains("busy"));

    assert_eq!(rev_parse(fx.repo(), &shadow_ref("m1-aaaa", "main")), None);
    assert_eq!(read_index_bytes(fx.repo()), index_before);
}

#[test]
fn identical_tree_is_a_noop() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");

    std::fs::write(fx.repo().join("wip.txt"), "draft\n").expect("write wip");
    fx.pulsar().arg("now").assert().success();
    let ref_name = shadow_ref("m1-aaaa", "main");
    let first = rev_parse(fx.repo(), &ref_name).expect("first snapshot");

    // Nothing changed: the ref must not advance.
    fx.pulsar()
        .arg("now")
        .assert()
        .success()
        .stdout(predicates::str::contains("no changes"));
    assert_eq!(rev_parse(fx.repo(), &ref_name), Some(first));
}

#[test]
fn shadow_chain_parents_previous_snapshot() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");

    std::fs::write(fx.repo().join("wip.txt"), "one\n").expect("write");
    fx.pulsar().arg("now").assert().success();
    let ref_name = shadow_ref("m1-aaaa", "main");
    let first = rev_parse(fx.repo(), &ref_name).expect("first");

    std::fs::write(fx.repo().join("wip.txt"), "two\n").expect("rewrite");
    fx.pulsar().arg("now").assert().success();
    let second = rev_parse(fx.repo(), &ref_name).expect("second");
    assert_ne!(first, second);

    let parents = fx.git(&["log", "--format=%P", "-1", &second]);
    assert_eq!(parents, first, "second snapshot parents the first");
}

#[test]
fn empty_repo_is_a_noop() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");

    let bare_parent = tempfile::TempDir::new().expect("tempdir");
    let fresh = bare_parent.path().join("fresh");
    std::fs::create_dir(&fresh).expect("mk fresh");
    common::git_in(&fresh, &["init", "-b", "main"]);
    std::fs::write(fresh.join("file.txt"), "x\n").expect("write");

    fx.pulsar()
        .current_dir(&fresh)
        .arg("now")
        .assert()
        .failure()
        .code(1)
        .stderr(predicates::str::contains("no commits"));
}
