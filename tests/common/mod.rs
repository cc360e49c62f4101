//! Shared test fixture: a repo with an initial commit, a bare remote, and
//! isolated pulsar state/config dirs.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command as StdCommand;
use std::sync::Mutex;

use assert_cmd::Command;
use tempfile::TempDir;

use git_pulsar::probe::SystemProbe;

pub struct Fixture {
    pub state_dir: TempDir,
    pub config_dir: TempDir,
    pub repo_dir: TempDir,
    pub remote_dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let state_dir = TempDir::new().expect("create state dir");
        let config_dir = TempDir::new().expect("create config dir");
        let repo_dir = TempDir::new().expect("create repo dir");
        let remote_dir = TempDir::new().expect("create remote dir");

        git_in(remote_dir.path(), &["init", "--bare", "-b", "main"]);

        git_in(repo_dir.path(), &["init", "-b", "main"]);
        git_in(repo_dir.path(), &["config", "user.email", "test@test.com"]);
        git_in(repo_dir.path(), &["config", "user.name", "Test"]);

        std::fs::write(repo_dir.path().join("README.md"), "hello\n").expect("seed file");
        git_in(repo_dir.path(), &["add", "."]);
        git_in(repo_dir.path(), &["commit", "-m", "initial"]);

        let remote = remote_dir.path().to_str().expect("remote path");
        git_in(repo_dir.path(), &["remote", "add", "origin", remote]);
        git_in(repo_dir.path(), &["push", "origin", "main"]);

        Self {
            state_dir,
            config_dir,
            repo_dir,
            remote_dir,
        }
    }

    pub fn repo(&self) -> &Path {
        self.repo_dir.path()
    }

    /// Pin the machine identity so shadow ref names are predictable.
    pub fn seed_machine_id(&self, id: &str) {
        std::fs::write(self.state_dir.path().join("machine_id"), id).expect("seed machine id");
    }

    /// The git-pulsar binary with state/config isolated to this fixture.
    pub fn pulsar(&self) -> Command {
        let mut cmd = Command::cargo_bin("git-pulsar").expect("binary built");
        cmd.current_dir(self.repo());
        cmd.env("PULSAR_STATE_DIR", self.state_dir.path());
        cmd.env("PULSAR_CONFIG_DIR", self.config_dir.path());
        cmd.env("PULSAR_NO_SPAWN", "1");
        cmd
    }

    pub fn git(&self, args: &[&str]) -> String {
        git_in(self.repo(), args)
    }

    /// Clone the remote into a sibling working copy (another "machine").
    pub fn clone_repo(&self) -> TempDir {
        let dir = TempDir::new().expect("create clone dir");
        let out = StdCommand::new("git")
            .args([
                "clone",
                self.remote_dir.path().to_str().expect("remote path"),
                dir.path().to_str().expect("clone path"),
            ])
            .output()
            .expect("git clone");
        assert!(out.status.success(), "clone failed: {out:?}");
        git_in(dir.path(), &["config", "user.email", "test@test.com"]);
        git_in(dir.path(), &["config", "user.name", "Test"]);
        dir
    }
}

pub fn git_in(dir: &Path, args: &[&str]) -> String {
    let out = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("git {args:?} failed to spawn: {e}"));
    assert!(
        out.status.success(),
        "git {args:?} in {dir:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim_end().to_string()
}

/// Probe with scripted host facts for library-level tests.
pub struct TestProbe {
    pub machine: String,
    pub battery: (u8, bool),
    pub loaded: bool,
    pub notifications: Mutex<Vec<(String, String)>>,
}

impl TestProbe {
    pub fn new(machine: &str) -> Self {
        Self {
            machine: machine.to_string(),
            battery: (100, true),
            loaded: false,
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().expect("notifications lock").len()
    }
}

impl SystemProbe for TestProbe {
    fn machine_id(&self) -> String {
        self.machine.clone()
    }

    fn battery(&self) -> (u8, bool) {
        self.battery
    }

    fn under_load(&self) -> bool {
        self.loaded
    }

    fn notify(&self, title: &str, body: &str) {
        self.notifications
            .lock()
            .expect("notifications lock")
            .push((title.to_string(), body.to_string()));
    }
}

/// Shadow ref name for a machine/branch pair, mirroring the engine layout.
pub fn shadow_ref(machine: &str, branch: &str) -> String {
    format!("refs/heads/wip/pulsar/{machine}/{branch}")
}

/// Resolve a ref in `dir`, `None` when absent.
pub fn rev_parse(dir: &Path, rev: &str) -> Option<String> {
    let out = StdCommand::new("git")
        .args(["rev-parse", "--verify", "--quiet", rev])
        .current_dir(dir)
        .output()
        .expect("git rev-parse");
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}

pub fn read_index_bytes(repo: &Path) -> Vec<u8> {
    std::fs::read(repo.join(".git/index")).expect("read index")
}

pub fn drift_state_json(repo: &Path) -> serde_json::Value {
    let bytes = std::fs::read(repo.join(".git/pulsar_drift_state")).expect("read drift state");
    serde_json::from_slice(&bytes).expect("parse drift state")
}
