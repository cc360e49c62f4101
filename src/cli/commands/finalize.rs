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

    match reconcile::finalize(&ctx.repo, &cfg, prompter) {
        Ok(outcome) => {
            println!("finalized into {}", outcome.commit);
            for (machine, files) in &outcome.contributions {
                println!("  {machine}: {files} file(s)");
            }
            0
        }
        Err(ReconcileError::Conflicts { conflicts }) => {
            eprintln!("conflicts across machines; nothing was merged:");
            for (path, machine) in &conflicts {
                eprintln!("  {path} (from {machine})");
            }
            3
        }
        Err(ReconcileError::DirtyWorkingTree) => {
            eprintln!("working tree has uncommitted changes; commit or stash them first");
            1
        }
        Err(ReconcileError::AlreadyUpToDate) => {
            println!("nothing new to fold; branch already contains every session");
            0
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
