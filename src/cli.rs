//! Command line interface of the `pds` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pds")]
#[command(about = "Ration distribution gateway: Diamond ABI, RPC resolution and wallet login")]
pub struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json", global = true)]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP gateway (default)
    Serve,
    /// Classify a wallet and persist the session on success
    Login {
        /// Wallet address, 0x-prefixed
        address: String,
    },
    /// Remove the persisted session record
    Logout,
    /// Print the merged Diamond ABI
    MergeAbi {
        /// Keep only the first event and the first error across all facets
        #[arg(long)]
        legacy_event_dedup: bool,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Walk the RPC candidates and report the first live endpoint
    ProbeRpc,
    /// Call a view function on the Diamond
    Call {
        /// Function name as it appears in the ABI
        function: String,
        /// Arguments, coerced by the function's input types
        args: Vec<String>,
    },
    /// Send a transaction to the Diamond with the configured signer and wait
    /// for its receipt
    Send {
        /// Function name as it appears in the ABI
        function: String,
        /// Arguments, coerced by the function's input types
        args: Vec<String>,
    },
}

impl CliArgs {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
