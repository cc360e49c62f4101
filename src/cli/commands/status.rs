use crate::cli::Ctx;
use crate::drift::{self, DriftState};
use crate::registry::Registry;

/// Dashboard over the registry, drift caches, and host probe.
///
/// Reads only local files: the drift banner comes from the cached state,
/// never from the network.
pub(crate) fn handle(ctx: &Ctx) -> u8 {
    let registry = match Registry::load() {
        Ok(reg) => reg,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let (percent, plugged) = ctx.probe.battery();
    println!("machine: {}", ctx.probe.machine_id());
    println!(
        "power:   {}% ({})",
        percent,
        if plugged { "AC" } else { "battery" }
    );

    if registry.repos.is_empty() {
        println!("\nno repositories tracked; run 'git-pulsar' inside one to register it");
        return 0;
    }

    let now = ctx.probe.now();
    println!();
    for entry in &registry.repos {
        let mut flags = Vec::new();
        if entry.paused {
            flags.push("paused".to_string());
        }

        let git_dir = entry.path.join(".git");
        let state = DriftState::load(&git_dir).unwrap_or_default();
        if let Some(reason) = &state.blocked {
            flags.push(format!("blocked: {reason}"));
        }

        println!(
            "{}  {}  snapshot {}",
            entry.path.display(),
            if flags.is_empty() {
                "ok".to_string()
            } else {
                flags.join(", ")
            },
            ago(now, entry.last_snapshot_at),
        );

        if !state.acknowledged && state.at_time > 0 {
            let machines = state.observed_machines.join(", ");
            println!(
                "  drift: newer session from [{machines}] {}; run 'git-pulsar sync'",
                ago(now, state.at_time)
            );
            // Displaying the banner dismisses it.
            let _ = drift::acknowledge(&git_dir);
        }
    }
    0
}

fn ago(now: i64, then: i64) -> String {
    if then <= 0 {
        return "never".to_string();
    }
    let secs = (now - then).max(0);
    match secs {
        0..60 => format!("{secs}s ago"),
        60..3600 => format!("{}m ago", secs / 60),
        3600..86_400 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
