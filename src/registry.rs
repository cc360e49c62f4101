//! Persistent set of tracked repositories.
//!
//! Single JSON file under the state dir. Every mutation is read → compute →
//! write to a temp file → fsync → rename, so readers observe either the old
//! or the new contents, never a partial write.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Effect, Transience};
use crate::paths;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry corrupted at {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write registry {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    pub fn transience(&self) -> Transience {
        match self {
            // Write failures may be a full disk or a permissions flap.
            RegistryError::Write { .. } | RegistryError::Read { .. } => Transience::Retryable,
            RegistryError::Corrupt { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        // The rename either happened or it did not; a failed write leaves the
        // previous registry intact.
        Effect::None
    }
}

/// One tracked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoEntry {
    /// Canonical absolute path; the registry key.
    pub path: PathBuf,
    /// Identity of the machine that registered this entry.
    pub machine_id: String,
    /// Branch checked out at registration time.
    pub branch_at_register: Option<String>,
    #[serde(default)]
    pub paused: bool,
    /// Unix seconds; 0 means never.
    #[serde(default)]
    pub last_snapshot_at: i64,
    #[serde(default)]
    pub last_push_at: i64,
    #[serde(default)]
    pub last_drift_check_at: i64,
}

impl RepoEntry {
    pub fn new(path: PathBuf, machine_id: String, branch_at_register: Option<String>) -> Self {
        Self {
            path,
            machine_id,
            branch_at_register,
            paused: false,
            last_snapshot_at: 0,
            last_push_at: 0,
            last_drift_check_at: 0,
        }
    }
}

/// Why prune removed an entry. Removal requires positive proof; any doubt
/// (permission error, unreadable metadata) keeps the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneReason {
    PathAbsent,
    NotARepo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub repos: Vec<RepoEntry>,
}

impl Registry {
    /// Load from the default location; a missing file is an empty registry.
    pub fn load() -> Result<Self, RegistryError> {
        Self::load_from(&paths::registry_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, RegistryError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(RegistryError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| RegistryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Atomically replace the registry file.
    pub fn save(&self) -> Result<(), RegistryError> {
        self.save_to(&paths::registry_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), RegistryError> {
        let write_err = |source| RegistryError::Write {
            path: path.to_path_buf(),
            source,
        };

        let dir = path
            .parent()
            .ok_or_else(|| write_err(std::io::Error::other("registry path has no parent")))?;
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        let json = serde_json::to_vec_pretty(self).map_err(|source| RegistryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path)
            .map_err(|e| write_err(e.error))?;
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<&RepoEntry> {
        self.repos.iter().find(|r| r.path == path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut RepoEntry> {
        self.repos.iter_mut().find(|r| r.path == path)
    }

    /// Add a repo; `false` when the path is already registered.
    pub fn register(&mut self, entry: RepoEntry) -> bool {
        if self.get(&entry.path).is_some() {
            return false;
        }
        self.repos.push(entry);
        self.repos.sort_by(|a, b| a.path.cmp(&b.path));
        true
    }

    /// Remove a repo; `false` when it was not registered.
    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.repos.len();
        self.repos.retain(|r| r.path != path);
        self.repos.len() != before
    }

    /// Drop entries whose path is proved absent or proved not a repository.
    ///
    /// Proof is strict: a `NotFound` on the path itself, or an existing path
    /// with no `.git` beneath it. I/O errors, permission failures, and any
    /// path oddity (whitespace, unusual encoding) are not proof and the
    /// entry survives.
    pub fn prune(&mut self) -> Vec<(RepoEntry, PruneReason)> {
        let mut removed = Vec::new();
        self.repos.retain(|entry| match prune_verdict(&entry.path) {
            Some(reason) => {
                removed.push((entry.clone(), reason));
                false
            }
            None => true,
        });
        removed
    }
}

fn prune_verdict(path: &Path) -> Option<PruneReason> {
    match std::fs::symlink_metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(PruneReason::PathAbsent),
        Err(_) => None,
        Ok(meta) if !meta.is_dir() => Some(PruneReason::NotARepo),
        Ok(_) => match std::fs::symlink_metadata(path.join(".git")) {
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(PruneReason::NotARepo),
            Err(_) => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &Path) -> RepoEntry {
        RepoEntry::new(path.to_path_buf(), "m1-abc".into(), Some("main".into()))
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = Registry::load_from(&dir.path().join("registry.json")).expect("load");
        assert!(reg.repos.is_empty());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("registry.json");

        let mut reg = Registry::default();
        assert!(reg.register(entry(Path::new("/work/a"))));
        assert!(!reg.register(entry(Path::new("/work/a"))));
        reg.save_to(&file).expect("save");

        let loaded = Registry::load_from(&file).expect("load");
        assert_eq!(loaded, reg);
    }

    #[test]
    fn save_replaces_whole_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("registry.json");

        let mut reg = Registry::default();
        reg.register(entry(Path::new("/work/a")));
        reg.register(entry(Path::new("/work/b")));
        reg.save_to(&file).expect("save");

        reg.remove(Path::new("/work/a"));
        reg.save_to(&file).expect("save again");

        let loaded = Registry::load_from(&file).expect("load");
        assert_eq!(loaded.repos.len(), 1);
        assert_eq!(loaded.repos[0].path, Path::new("/work/b"));
        // No temp file left behind next to the registry.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "registry.json")
            .collect();
        assert!(leftovers.is_empty(), "stray files: {leftovers:?}");
    }

    #[test]
    fn prune_requires_proof() {
        let dir = tempfile::tempdir().expect("tempdir");

        let repo = dir.path().join("repo");
        std::fs::create_dir_all(repo.join(".git")).expect("mk repo");

        let plain_dir = dir.path().join("not-a-repo");
        std::fs::create_dir(&plain_dir).expect("mk dir");

        let file = dir.path().join("some-file");
        std::fs::write(&file, b"x").expect("mk file");

        let gone = dir.path().join("vanished");

        // A name with whitespace that exists and is a repo must survive.
        let spaced = dir.path().join("has space ");
        std::fs::create_dir_all(spaced.join(".git")).expect("mk spaced repo");

        let mut reg = Registry::default();
        for p in [&repo, &plain_dir, &file, &gone, &spaced] {
            reg.register(entry(p));
        }

        let removed = reg.prune();
        let removed_paths: Vec<_> = removed.iter().map(|(e, _)| e.path.clone()).collect();
        assert!(removed_paths.contains(&plain_dir));
        assert!(removed_paths.contains(&file));
        assert!(removed_paths.contains(&gone));
        assert_eq!(reg.repos.len(), 2);
        assert!(reg.get(&repo).is_some());
        assert!(reg.get(&spaced).is_some());
    }

    mod prune_property {
        use super::*;
        use proptest::prelude::*;

        // Names exercising whitespace, dots and unicode; never path
        // separators or NUL.
        fn name_strategy() -> impl Strategy<Value = String> {
            proptest::string::string_regex("[a-zA-Z0-9 ._\u{e9}\u{4e16}-]{1,12}")
                .expect("regex strategy")
                .prop_filter("dot dirs collide", |s| {
                    !s.trim().is_empty() && s.trim_matches('.') != ""
                })
        }

        proptest! {
            // Invariant: prune removes an entry iff the path was proved
            // absent or proved non-repo at check time.
            #[test]
            fn prune_removes_exactly_proven_entries(
                names in proptest::collection::btree_set(name_strategy(), 1..8),
                kinds in proptest::collection::vec(0u8..3, 8),
            ) {
                let dir = tempfile::tempdir().expect("tempdir");
                let mut reg = Registry::default();
                let mut expect_kept = Vec::new();
                let mut expect_removed = Vec::new();

                for (name, kind) in names.iter().zip(kinds.iter()) {
                    let path = dir.path().join(name);
                    match kind {
                        0 => {
                            std::fs::create_dir_all(path.join(".git")).expect("mk repo");
                            expect_kept.push(path.clone());
                        }
                        1 => {
                            std::fs::create_dir_all(&path).expect("mk dir");
                            expect_removed.push(path.clone());
                        }
                        _ => expect_removed.push(path.clone()),
                    }
                    reg.register(RepoEntry::new(path, "m".into(), None));
                }

                let removed: Vec<_> =
                    reg.prune().into_iter().map(|(e, _)| e.path).collect();

                for p in &expect_removed {
                    prop_assert!(removed.contains(p), "should remove {p:?}");
                }
                for p in &expect_kept {
                    prop_assert!(reg.get(p).is_some(), "should keep {p:?}");
                }
            }
        }
    }
}
