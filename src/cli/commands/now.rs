use crate::cli::Ctx;
use crate::config::Config;
use crate::engine::{self, PushOutcome, SkipReason, SnapshotOutcome};
use crate::registry::Registry;

/// Synchronous snapshot + push, bypassing cadences and background gates.
pub(crate) fn handle(ctx: &Ctx) -> u8 {
    let cfg = match Config::load(Some(&ctx.repo)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    match engine::snapshot(&ctx.repo, &cfg, ctx.probe.as_ref(), true) {
        Ok(SnapshotOutcome::Committed { ref_name, stat, .. }) => {
            println!(
                "captured {} ({} files, +{}/-{})",
                ref_name, stat.files_changed, stat.insertions, stat.deletions
            );
        }
        Ok(SnapshotOutcome::NoChange) => {
            println!("no changes since last snapshot");
        }
        Ok(SnapshotOutcome::Skipped(reason)) => {
            match reason {
                SkipReason::Busy(marker) => eprintln!("busy: {marker}"),
                SkipReason::LockHeld => eprintln!("busy: another pulsar operation is running"),
                SkipReason::EmptyRepo => eprintln!("nothing to snapshot: repository has no commits"),
                other => eprintln!("skipped: {other:?}"),
            }
            return 1;
        }
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    }

    match engine::push_shadow(&ctx.repo, &cfg, ctx.probe.as_ref(), true) {
        Ok(PushOutcome::Pushed) => println!("pushed"),
        Ok(PushOutcome::NothingToPush) => {}
        Ok(PushOutcome::Deferred(why)) => println!("push deferred: {why}"),
        Err(e) => {
            eprintln!("push error: {e}");
            return 1;
        }
    }

    record_timestamps(ctx);
    0
}

fn record_timestamps(ctx: &Ctx) {
    let now = ctx.probe.now();
    let Ok(mut registry) = Registry::load() else {
        return;
    };
    let Some(entry) = registry.get_mut(&ctx.repo) else {
        return;
    };
    entry.last_snapshot_at = now;
    entry.last_push_at = now;
    let _ = registry.save();
}
