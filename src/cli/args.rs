//! CLI argument definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// satstore - onboard image storage and downlink coordination
#[derive(Parser, Debug)]
#[command(name = "satstore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a new flash image file
    Format {
        /// Path to configuration file
        #[arg(long, default_value = "./satstore.json")]
        config: PathBuf,
    },

    /// Run the capture/classify/downlink loop against a simulated controller
    Run {
        /// Path to configuration file
        #[arg(long, default_value = "./satstore.json")]
        config: PathBuf,

        /// Number of captures to simulate
        #[arg(long, default_value_t = 20)]
        captures: u32,

        /// Delay between loop iterations in milliseconds
        #[arg(long, default_value_t = 50)]
        interval_ms: u64,
    },

    /// Print the block table and live record summary
    Inspect {
        /// Path to configuration file
        #[arg(long, default_value = "./satstore.json")]
        config: PathBuf,
    },

    /// Export every live payload to a directory
    Recover {
        /// Path to configuration file
        #[arg(long, default_value = "./satstore.json")]
        config: PathBuf,

        /// Output directory for recovered payloads
        #[arg(long, default_value = "./recovered")]
        out: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
