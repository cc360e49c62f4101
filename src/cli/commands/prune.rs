use crate::cli::Ctx;
use crate::reconcile;

pub(crate) fn handle(ctx: &Ctx) -> u8 {
    match reconcile::prune(&ctx.repo, ctx.probe.as_ref()) {
        Ok(outcome) if outcome.deleted > 0 => {
            println!("dropped {} stale shadow ref(s)", outcome.deleted);
            0
        }
        Ok(_) => {
            println!("no stale shadow refs");
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}
