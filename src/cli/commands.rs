use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `checkin-relay` - lightweight presence check-ins over a WebSocket relay.
#[derive(Parser, Debug)]
#[command(name = "checkin-relay")]
#[command(version)]
#[command(about = "Broadcast short \"what I'm working on\" check-ins.", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.checkin-relay/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay server
    Relay {
        /// Host to bind to (default: relay.host from config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (use 0 for random available port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Connect and stream check-ins to the terminal until Ctrl-C
    Watch,

    /// Publish one check-in and exit
    Send {
        /// What you are working on
        message: String,

        /// Activity tag (repeatable, at most 3 are kept)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Seconds to wait for the relay before giving up
        #[arg(long, default_value = "10")]
        wait_secs: u64,
    },

    /// Print the effective configuration (secrets masked)
    Config,
}
