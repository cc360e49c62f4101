//! Git subprocess error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Errors from the git subprocess boundary.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GitError {
    #[error("not a git repository: {0:?}")]
    NotARepo(PathBuf),

    #[error("git binary not found on PATH")]
    MissingBinary(#[source] std::io::Error),

    #[error("git {argv:?} exited {exit_code}: {stderr}")]
    Command {
        argv: Vec<String>,
        exit_code: i32,
        stderr: String,
    },

    #[error("git {argv:?} killed after {timeout_secs}s")]
    Timeout {
        argv: Vec<String>,
        timeout_secs: u64,
    },

    #[error("repository busy: {0}")]
    Busy(&'static str),

    #[error("ref update lost race on {ref_name}")]
    RefCasFailed { ref_name: String },

    #[error("ref {ref_name} points at missing object {oid}")]
    BrokenRef { ref_name: String, oid: String },

    #[error("unparseable output from git {argv:?}: {detail}")]
    Parse { argv: Vec<String>, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Whether retrying this operation may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            // Contention and network-shaped failures clear on their own.
            GitError::Busy(_) | GitError::RefCasFailed { .. } | GitError::Timeout { .. } => {
                Transience::Retryable
            }

            GitError::NotARepo(_)
            | GitError::MissingBinary(_)
            | GitError::BrokenRef { .. }
            | GitError::Parse { .. } => Transience::Permanent,

            // A non-zero exit can be a dropped connection or a bad argument.
            GitError::Command { .. } | GitError::Io(_) => Transience::Unknown,
        }
    }

    /// What we know about side effects when this error is returned.
    pub fn effect(&self) -> Effect {
        match self {
            // Checked before any object is written.
            GitError::NotARepo(_) | GitError::MissingBinary(_) | GitError::Busy(_) => Effect::None,

            // CAS loss means our commit objects exist but the ref did not move.
            GitError::RefCasFailed { .. } => Effect::Some,

            GitError::Command { .. }
            | GitError::Timeout { .. }
            | GitError::BrokenRef { .. }
            | GitError::Parse { .. }
            | GitError::Io(_) => Effect::Unknown,
        }
    }
}
