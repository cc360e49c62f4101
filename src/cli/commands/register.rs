use std::process::{Command, Stdio};

use crate::cli::Ctx;
use crate::git::GitRepo;
use crate::paths;
use crate::registry::{Registry, RepoEntry};

pub(crate) fn handle(ctx: &Ctx) -> u8 {
    let repo = match GitRepo::open(&ctx.repo) {
        Ok(repo) => repo,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let branch = match repo.current_branch() {
        Ok(branch) => branch,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let machine_id = ctx.probe.machine_id();
    let mut registry = match Registry::load() {
        Ok(reg) => reg,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let entry = RepoEntry::new(ctx.repo.clone(), machine_id.clone(), branch);
    if !registry.register(entry) {
        eprintln!("already registered: {}", ctx.repo.display());
        return 2;
    }
    if let Err(e) = registry.save() {
        eprintln!("error: {e}");
        return 1;
    }

    println!("registered {} as {machine_id}", ctx.repo.display());
    ensure_daemon();
    0
}

/// Start a detached daemon unless one is already alive.
///
/// `PULSAR_NO_SPAWN` suppresses this for tests and service-managed installs
/// where launchd/systemd owns the process.
fn ensure_daemon() {
    if std::env::var_os("PULSAR_NO_SPAWN").is_some() {
        return;
    }
    if daemon_alive() {
        return;
    }
    let Ok(exe) = std::env::current_exe() else {
        eprintln!("warning: cannot locate own binary; start the daemon manually");
        return;
    };
    match Command::new(exe)
        .args(["daemon", "run"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => {
            tracing::info!(pid = child.id(), "daemon started");
            println!("daemon started (pid {})", child.id());
        }
        Err(e) => eprintln!("warning: could not start daemon: {e}"),
    }
}

fn daemon_alive() -> bool {
    let Ok(contents) = std::fs::read_to_string(paths::pid_path()) else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        return false;
    };
    // Signal 0 probes liveness without touching the process.
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}
