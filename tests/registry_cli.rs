//! Registry verbs and their exit codes.

mod common;

use common::Fixture;

#[test]
fn register_twice_exits_two() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");

    fx.pulsar().arg("register").assert().success();
    fx.pulsar()
        .arg("register")
        .assert()
        .failure()
        .code(2)
        .stderr(predicates::str::contains("already registered"));
}

#[test]
fn default_invocation_registers() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");

    fx.pulsar().assert().success();

    let registry = std::fs::read_to_string(fx.state_dir.path().join("registry.json"))
        .expect("registry written");
    assert!(registry.contains("m1-aaaa"));
}

#[test]
fn pause_resume_remove_cycle() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");
    fx.pulsar().arg("register").assert().success();

    fx.pulsar().arg("pause").assert().success();
    let registry = std::fs::read_to_string(fx.state_dir.path().join("registry.json"))
        .expect("registry");
    assert!(registry.contains("\"paused\": true"));

    fx.pulsar().arg("resume").assert().success();
    let registry = std::fs::read_to_string(fx.state_dir.path().join("registry.json"))
        .expect("registry");
    assert!(registry.contains("\"paused\": false"));

    fx.pulsar().arg("remove").assert().success();
    let registry = std::fs::read_to_string(fx.state_dir.path().join("registry.json"))
        .expect("registry");
    assert!(!registry.contains("m1-aaaa"));
}

#[test]
fn status_lists_tracked_repos() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");
    fx.pulsar().arg("register").assert().success();

    let repo_name = fx
        .repo()
        .canonicalize()
        .expect("canonical repo path")
        .to_string_lossy()
        .into_owned();
    fx.pulsar()
        .arg("status")
        .assert()
        .success()
        .stdout(predicates::str::contains("m1-aaaa"))
        .stdout(predicates::str::contains(repo_name))
        .stdout(predicates::str::contains("snapshot never"));
}

#[test]
fn status_with_empty_registry_succeeds() {
    let fx = Fixture::new();
    fx.seed_machine_id("m1-aaaa");
    fx.pulsar()
        .arg("status")
        .assert()
        .success()
        .stdout(predicates::str::contains("no repositories tracked"));
}

#[test]
fn register_outside_a_repo_fails() {
    let fx = Fixture::new();
    let not_a_repo = tempfile::TempDir::new().expect("tempdir");
    fx.pulsar()
        .current_dir(not_a_repo.path())
        .arg("register")
        .assert()
        .failure()
        .code(1)
        .stderr(predicates::str::contains("not a git repository"));
}
