//! Retention: shadow refs age out after thirty days.

mod common;

use std::process::Command as StdCommand;

use common::{Fixture, rev_parse, shadow_ref};

/// Plant a shadow ref whose commit is `days` old.
fn plant_old_shadow(fx: &Fixture, machine: &str, days: i64) -> String {
    let tree = fx.git(&["rev-parse", "HEAD^{tree}"]);
    let head = fx.git(&["rev-parse", "HEAD"]);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64;
    let when = format!("@{} +0000", now - days * 86_400);

    let out = StdCommand::new("git")
        .args(["commit-tree", &tree, "-p", &head, "-m", "old session"])
        .env("GIT_AUTHOR_DATE", &when)
        .env("GIT_COMMITTER_DATE", &when)
        .current_dir(fx.repo())
        .output()
        .expect("commit-tree");
    assert!(out.status.success(), "commit-tree: {out:?}");
    let oid = String::from_utf8_lossy(&out.stdout).trim().to_string();

    let ref_name = shadow_ref(machine, "main");
    fx.git(&["update-ref", &ref_name, &oid]);
    ref_name
}

#[test]
fn prune_collects_aged_refs_and_keeps_fresh_ones() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");

    let old_ref = plant_old_shadow(&fx, "m9-old", 45);
    let young_ref = plant_old_shadow(&fx, "m8-young", 3);

    fx.pulsar()
        .arg("prune")
        .assert()
        .success()
        .stdout(predicates::str::contains("dropped 1"));

    assert_eq!(rev_parse(fx.repo(), &old_ref), None);
    assert!(rev_parse(fx.repo(), &young_ref).is_some());
}

#[test]
fn prune_with_nothing_stale_reports_so() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");
    std::fs::write(fx.repo().join("work.txt"), "fresh\n").expect("write");
    fx.pulsar().arg("now").assert().success();

    fx.pulsar()
        .arg("prune")
        .assert()
        .success()
        .stdout(predicates::str::contains("no stale"));
}

#[test]
fn boundary_just_inside_retention_survives() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");

    let kept = plant_old_shadow(&fx, "m7-edge", 29);
    fx.pulsar().arg("prune").assert().success();
    assert!(rev_parse(fx.repo(), &kept).is_some());
}
