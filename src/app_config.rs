//! Command-line interface definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dicechain", version)]
#[command(about = "Serverless multi-party Yahtzee over a signed block log")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log at debug level regardless of configuration
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a new identity and print its keys
    Keygen,

    /// Print the fingerprint of a public key
    Fingerprint {
        /// Public key, 64 hex characters
        public_key: String,
    },

    /// Play a whole game between automatic players over an in-process relay
    Simulate {
        #[arg(short, long, default_value = "3")]
        players: usize,

        /// Probability that the relay loses a frame
        #[arg(long, default_value = "0.0")]
        drop_rate: f64,

        /// Seed for the relay's losses
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Join a game through a network relay and play it automatically
    #[cfg(feature = "ws-client")]
    Play {
        /// Own secret key, 64 hex characters
        #[arg(long, env = "DICECHAIN_SECRET_KEY")]
        secret_key: String,

        /// Public keys of the other players
        #[arg(long = "peer", required = true)]
        peers: Vec<String>,
    },
}

/// Check a drop rate argument
pub fn parse_drop_rate(rate: f64) -> Result<f64, String> {
    if (0.0..1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("drop rate must be in [0, 1), got {}", rate))
    }
}
