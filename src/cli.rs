use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "face-bulk-admin")]
#[command(about = "Administrative bulk operations for a remote face verification backend.")]
pub(crate) struct Cli {
    /// Override config directory.
    #[arg(long, global = true)]
    pub(crate) conf: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the admin HTTP server.
    Serve {
        /// Listen address; overrides `gateway.bind` from settings.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Validate the merged settings and print the resolved backend endpoint.
    CheckConfig,
}
