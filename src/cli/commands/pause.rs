use crate::cli::Ctx;
use crate::registry::Registry;

/// Shared by `pause` and `resume`.
pub(crate) fn handle(ctx: &Ctx, paused: bool) -> u8 {
    let mut registry = match Registry::load() {
        Ok(reg) => reg,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    match registry.get_mut(&ctx.repo) {
        Some(entry) => {
            entry.paused = paused;
            if let Err(e) = registry.save() {
                eprintln!("error: {e}");
                return 1;
            }
            println!(
                "{} {}",
                if paused { "paused" } else { "resumed" },
                ctx.repo.display()
            );
        }
        None => {
            eprintln!("not registered: {}", ctx.repo.display());
        }
    }
    0
}
