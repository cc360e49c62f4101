use crate::cli::Ctx;
use crate::config::Config;
use crate::reconcile::{self, Prompter, ReconcileError, StdinPrompter};

use super::AutoConfirm;

pub(crate) fn handle(ctx: &Ctx, yes: bool) -> u8 {
    let cfg = match Config::load(Some(&ctx.repo)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let mut stdin = StdinPrompter;
    let mut auto = AutoConfirm;
    let prompter: &mut dyn Prompter = if yes { &mut auto } else { &mut stdin };

    match reconcile::sync(&ctx.repo, &cfg, ctx.probe.as_ref(), prompter) {
        Ok(outcome) => {
            println!("session synced from '{}'", outcome.machine);
            0
        }
        Err(ReconcileError::DirtyWorkingTree) => {
            eprintln!("working tree has uncommitted changes; commit or stash them first");
            1
        }
        Err(ReconcileError::NoShadowRefs) | Err(ReconcileError::AlreadyUpToDate) => {
            println!("already up to date; no newer session anywhere");
            2
        }
        Err(ReconcileError::Canceled) => {
            eprintln!("aborted");
            1
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}
