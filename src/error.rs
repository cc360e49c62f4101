use thiserror::Error;

use crate::config::ConfigError;
use crate::drift::DriftError;
use crate::engine::EngineError;
use crate::git::GitError;
use crate::lock::RepoLockError;
use crate::reconcile::ReconcileError;
use crate::registry::RegistryError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred (locally or remotely).
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over capability errors; each variant keeps its own
/// transience/effect classification.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Drift(#[from] DriftError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Lock(#[from] RepoLockError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Git(e) => e.transience(),
            Error::Registry(e) => e.transience(),
            Error::Config(_) => Transience::Permanent,
            Error::Engine(e) => e.transience(),
            Error::Drift(e) => e.transience(),
            Error::Reconcile(e) => e.transience(),
            Error::Lock(_) => Transience::Retryable,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Git(e) => e.effect(),
            Error::Registry(e) => e.effect(),
            Error::Config(_) => Effect::None,
            Error::Engine(e) => e.effect(),
            Error::Drift(_) => Effect::None,
            Error::Reconcile(e) => e.effect(),
            Error::Lock(_) => Effect::None,
        }
    }
}
