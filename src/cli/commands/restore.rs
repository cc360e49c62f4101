use crate::cli::Ctx;
use crate::reconcile::{self, ReconcileError, StdinPrompter};

pub(crate) fn handle(ctx: &Ctx, path: &str, force: bool) -> u8 {
    let mut prompter = StdinPrompter;
    match reconcile::restore(&ctx.repo, path, force, ctx.probe.as_ref(), &mut prompter) {
        Ok(()) => {
            println!("restored '{path}'");
            0
        }
        Err(ReconcileError::Canceled) => {
            eprintln!("aborted; '{path}' untouched");
            1
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}
