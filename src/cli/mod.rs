//! Command-line interface.
//!
//! Commands:
//! - `satstore format --config <path>`: initialize a flash image
//! - `satstore run --config <path>`: run the capture/downlink loop against
//!   a simulated controller
//! - `satstore inspect --config <path>`: block table and live record summary
//! - `satstore recover --config <path> --out <dir>`: export live payloads

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use errors::{CliError, CliResult};

/// Parse arguments and dispatch to the selected command.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    match cli.command {
        Command::Format { config } => commands::format(&config),
        Command::Run {
            config,
            captures,
            interval_ms,
        } => commands::run_loop(&config, captures, interval_ms),
        Command::Inspect { config } => commands::inspect(&config),
        Command::Recover { config, out } => commands::recover(&config, &out),
    }
}
