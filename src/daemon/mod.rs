//! Daemon module - the background snapshot service.
//!
//! One long-lived process: a tick loop computes due jobs per registered
//! repo from three independent cadences (snapshot, push, drift poll) and
//! feeds a small worker pool. All coordination with foreground commands is
//! through files: the registry, per-repo locks, and drift-state caches.

pub mod run;
pub mod scheduler;
pub mod worker;

pub use run::run_daemon;
pub use scheduler::{Cadence, JobKind};
pub use worker::{Job, JobResult, run_worker_loop};
