//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

/// atlas-link - real-time client for the Atlas probing platform
///
/// Connects to the Atlas server over WebSocket, follows the live event
/// feed, sends protocol messages and can run a probe session.
#[derive(Parser, Debug)]
#[command(name = "atlas-link")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Connection options shared by the networked commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Path to configuration file
    #[arg(short, long, env = "ATLAS_CONFIG")]
    pub config: Option<String>,

    /// WebSocket URL, overrides the configured server
    #[arg(short, long)]
    pub url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream live events from the server, one JSON document per line
    Watch {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Only print messages of these types (repeatable)
        #[arg(short = 't', long = "type")]
        types: Vec<String>,

        /// Also print frames that are not JSON
        #[arg(long)]
        raw: bool,
    },

    /// Send one message and exit
    Send {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Message type, e.g. ping
        kind: String,

        /// JSON payload for the data field
        #[arg(short, long, default_value = "{}")]
        data: String,

        /// Seconds to wait for the connection to open
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Run a probe session (register, heartbeat, receive tasks)
    Probe {
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
