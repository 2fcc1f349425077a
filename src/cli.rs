//! Command line interface for the `muxwire` binary.
//!
//! Shared with `build.rs`, which renders the man page, so it must not depend
//! on the library.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command line arguments for the `muxwire` binary.
#[derive(Debug, Parser)]
#[command(name = "muxwire", version, about = "Inspect captured muxwire and WebSocket traffic")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decode a captured byte stream and print one line per frame.
    Inspect {
        /// File holding the raw bytes read from one direction of a connection.
        file: PathBuf,
        /// Decode WebSocket frames instead of multiplexed-connection frames.
        #[arg(long)]
        websocket: bool,
        /// Role of the endpoint that read the capture.
        #[arg(long, value_enum, default_value_t = CliRole::Client)]
        role: CliRole,
    },
}

/// Endpoint role as spelled on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliRole {
    Client,
    Server,
}
