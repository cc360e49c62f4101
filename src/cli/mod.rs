//! CLI surface for git-pulsar.
//!
//! Thin handlers over the core: every verb resolves a repo context, calls
//! into the engine/reconciler/registry, and maps outcomes onto the
//! documented exit codes.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::probe::SystemProbe;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "git-pulsar",
    version,
    about = "Continuous working-tree snapshots into shadow git refs",
    infer_subcommands = true
)]
pub struct Cli {
    /// Repository path (default: current directory).
    #[arg(long, global = true, value_name = "PATH")]
    pub repo: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// No subcommand registers the current repository.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Track this repository and make sure the daemon is running.
    Register,

    /// Snapshot and push right now, ignoring cadences.
    Now,

    /// Adopt the newest cross-machine session into the working tree.
    Sync(SyncArgs),

    /// Restore one file from this machine's latest snapshot.
    Restore(RestoreArgs),

    /// Fold all machines' session streams into the current branch.
    Finalize(FinalizeArgs),

    /// Stop snapshotting this repository (keeps it registered).
    Pause,

    /// Resume snapshotting this repository.
    Resume,

    /// Stop tracking this repository.
    Remove,

    /// Show tracked repos, drift banners and host state. Never touches
    /// the network.
    Status,

    /// Delete shadow refs past retention and refs already finalized.
    Prune,

    /// Daemon control (internal). `git-pulsar daemon run` starts the service.
    #[command(hide = true)]
    Daemon {
        #[command(subcommand)]
        cmd: DaemonCmd,
    },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCmd {
    /// Run the daemon in the foreground.
    Run,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Skip the confirmation prompt.
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Path to restore, relative to the repo root.
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Overwrite uncommitted changes without negotiating.
    #[arg(short = 'f', long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct FinalizeArgs {
    /// Skip the confirmation prompt.
    #[arg(short = 'y', long)]
    pub yes: bool,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// Repo context shared by handlers.
pub struct Ctx {
    pub repo: PathBuf,
    pub probe: Arc<dyn SystemProbe>,
}

impl Ctx {
    fn resolve(repo: Option<PathBuf>, probe: Arc<dyn SystemProbe>) -> std::io::Result<Self> {
        let base = match repo {
            Some(path) => path,
            None => std::env::current_dir()?,
        };
        Ok(Self {
            repo: base.canonicalize()?,
            probe,
        })
    }
}

/// Dispatch a parsed command; the return value is the process exit code.
pub fn run(cli: Cli, probe: Arc<dyn SystemProbe>) -> u8 {
    let command = cli.command.unwrap_or(Commands::Register);

    if let Commands::Daemon { cmd: DaemonCmd::Run } = command {
        return commands::daemon::handle(probe);
    }

    let ctx = match Ctx::resolve(cli.repo, probe) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: cannot resolve repository path: {e}");
            return 1;
        }
    };

    match command {
        Commands::Register => commands::register::handle(&ctx),
        Commands::Now => commands::now::handle(&ctx),
        Commands::Sync(args) => commands::sync::handle(&ctx, args.yes),
        Commands::Restore(args) => commands::restore::handle(&ctx, &args.path, args.force),
        Commands::Finalize(args) => commands::finalize::handle(&ctx, args.yes),
        Commands::Pause => commands::pause::handle(&ctx, true),
        Commands::Resume => commands::pause::handle(&ctx, false),
        Commands::Remove => commands::remove::handle(&ctx),
        Commands::Status => commands::status::handle(&ctx),
        Commands::Prune => commands::prune::handle(&ctx),
        Commands::Daemon { .. } => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_invocation_registers() {
        let cli = parse_from(["git-pulsar"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn restore_takes_path_and_force() {
        let cli = parse_from(["git-pulsar", "restore", "src/main.rs", "--force"]);
        match cli.command {
            Some(Commands::Restore(args)) => {
                assert_eq!(args.path, "src/main.rs");
                assert!(args.force);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn verbosity_accumulates() {
        let cli = parse_from(["git-pulsar", "-vv", "status"]);
        assert_eq!(cli.verbose, 2);
    }
}
