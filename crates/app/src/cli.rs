//! CLI dispatcher for the `gencam` binary.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::serve;
use crate::view::{self, ViewArgs};

/// Parse CLI arguments and run the requested front-end.
pub fn dispatch() -> Result<()> {
    let cli = AppCli::parse();
    match cli.command {
        Command::View(args) => view::run(args),
        Command::Serve => serve::run(),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "gencam",
    version,
    about = "GenICam camera viewer and WebSocket frame streamer"
)]
struct AppCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture frames locally and print per-frame statistics.
    View(ViewArgs),
    /// Run the WebSocket streaming server (configured via STREAMSERVER_*
    /// environment variables).
    Serve,
}
