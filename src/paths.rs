//! XDG directory helpers for state/config locations.

use std::path::{Path, PathBuf};

/// Base directory for runtime state (registry, daemon log, machine id).
///
/// Uses `PULSAR_STATE_DIR` if set, otherwise `$XDG_STATE_HOME/git-pulsar` or
/// `~/.local/state/git-pulsar`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PULSAR_STATE_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_STATE_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("state")
        })
        .join("git-pulsar")
}

/// Base directory for configuration files.
///
/// Uses `PULSAR_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/git-pulsar` or
/// `~/.config/git-pulsar`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PULSAR_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("git-pulsar")
}

/// Registry of tracked repositories.
pub fn registry_path() -> PathBuf {
    state_dir().join("registry.json")
}

/// Cached resolved machine identity.
pub fn machine_id_path() -> PathBuf {
    state_dir().join("machine_id")
}

/// Daemon pid file.
pub fn pid_path() -> PathBuf {
    state_dir().join("daemon.pid")
}

/// Timestamp file gating the weekly maintenance prune.
pub fn last_prune_path() -> PathBuf {
    state_dir().join("last_prune")
}

/// Global config file.
pub fn global_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Isolated index used for shadow snapshots (transient).
pub fn shadow_index_path(git_dir: &Path) -> PathBuf {
    git_dir.join("pulsar_index")
}

/// Cached drift state for a repository.
pub fn drift_state_path(git_dir: &Path) -> PathBuf {
    git_dir.join("pulsar_drift_state")
}

/// Per-repo advisory lock file.
pub fn repo_lock_path(git_dir: &Path) -> PathBuf {
    git_dir.join("pulsar.lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_paths_live_under_git_dir() {
        let git_dir = Path::new("/work/repo/.git");
        assert_eq!(
            shadow_index_path(git_dir),
            PathBuf::from("/work/repo/.git/pulsar_index")
        );
        assert_eq!(
            drift_state_path(git_dir),
            PathBuf::from("/work/repo/.git/pulsar_drift_state")
        );
        assert_eq!(
            repo_lock_path(git_dir),
            PathBuf::from("/work/repo/.git/pulsar.lock")
        );
    }
}
