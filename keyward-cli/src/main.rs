//! Keyward: keeps RabbitMQ accounts in step with mounted credential files.
//!
//! # Usage
//!
//! ```text
//! keyward watch [--watch-dir <dir>] [--admin-file <path>] [--management-uri <uri>]
//!               [--ca-file <path>] [--log-format text|json]
//! keyward check [--watch-dir <dir>] [--admin-file <path>] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, watch::WatchArgs};

#[derive(Parser, Debug)]
#[command(
    name = "keyward",
    version,
    about = "Reconcile credential files with the RabbitMQ account registry",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the credential directory and reconcile on every change.
    Watch(WatchArgs),

    /// Inspect the credential directory and admin file without contacting the server.
    Check(CheckArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Watch(args) => args.run(),
        Commands::Check(args) => args.run(),
    }
}
