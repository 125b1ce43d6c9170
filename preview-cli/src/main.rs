//! Preview: on-demand website previews built from git repositories.
//!
//! # Usage
//!
//! ```text
//! preview serve [--config <path>]
//! preview stop
//! preview status [--json]
//! preview build <owner> <name> <permalink> [--template <path>] [--working-copy <dir>]
//! preview sync <owner> <name> [--discover <dir>] [--wait]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{build::BuildArgs, daemon::ServeArgs, status::StatusArgs, sync::SyncArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "preview",
    version,
    about = "Build and serve website previews on demand",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the preview daemon in the foreground.
    Serve(ServeArgs),

    /// Ask a running daemon to shut down.
    Stop,

    /// Show queue, cache and sync state of the running daemon.
    Status(StatusArgs),

    /// Build one page through the daemon.
    Build(BuildArgs),

    /// Trigger a working-copy sync through the daemon.
    Sync(SyncArgs),

    /// Run one build as an isolated worker (spawned by the daemon).
    #[command(hide = true)]
    Worker,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => args.run(),
        Commands::Stop => commands::daemon::stop(),
        Commands::Status(args) => args.run(),
        Commands::Build(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Worker => commands::worker::run(),
    }
}
