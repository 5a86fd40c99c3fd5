//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the gateway server
//! - `version` -- print version info

use clap::{Parser, Subcommand};

/// vidgate video download gateway.
#[derive(Parser, Debug)]
#[command(
    name = "vidgate",
    version = env!("CARGO_PKG_VERSION"),
    about = "vidgate — resolve video page URLs and relay the media stream"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Start {
        /// Listen port (overrides the PORT environment variable).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print version information.
    Version,
}

/// Print the version banner.
pub fn handle_version() {
    println!("vidgate {}", env!("CARGO_PKG_VERSION"));
}
