use crate::cli::Ctx;
use crate::registry::Registry;

pub(crate) fn handle(ctx: &Ctx) -> u8 {
    let mut registry = match Registry::load() {
        Ok(reg) => reg,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    if registry.remove(&ctx.repo) {
        if let Err(e) = registry.save() {
            eprintln!("error: {e}");
            return 1;
        }
        println!("removed {}", ctx.repo.display());
    } else {
        eprintln!("not registered: {}", ctx.repo.display());
    }
    0
}
