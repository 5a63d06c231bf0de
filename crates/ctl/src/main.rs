//! dipboard control tool
//!
//! Command-line front-end for the dipboard driver: enumerates boards,
//! shows the DIP switch bank and moves bytes over the bulk channel.

mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use config::CtlConfig;

#[derive(Parser, Debug)]
#[command(name = "dipboard-ctl")]
#[command(author, version, about = "Control tool for the USB dipboard")]
#[command(long_about = "
Talks to a dipboard over USB: a DIP-switch bank reported on an interrupt
endpoint plus a bulk loopback channel.

EXAMPLES:
    # Show connected boards
    dipboard-ctl list

    # Print the switch bank as eight 0/1 characters
    dipboard-ctl switches

    # Print the bank on every change, stop after three
    dipboard-ctl watch --count 3

    # Push three bytes through the bulk channel and read them back
    dipboard-ctl write 01 02 03
    dipboard-ctl read --len 3

CONFIGURATION:
    Board identity is read from the file given with --config, falling
    back to ~/.config/dipboard/ctl.toml, then to built-in defaults.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connected boards
    List,
    /// Print the DIP switch bank
    Switches,
    /// Print the bank every time it changes
    Watch {
        /// Stop after this many changes
        #[arg(long, value_name = "N")]
        count: Option<u64>,
    },
    /// Read bytes from the bulk-in channel
    Read {
        /// Maximum number of bytes to read
        #[arg(long, default_value_t = 64, value_name = "BYTES")]
        len: usize,
    },
    /// Write hex bytes to the bulk-out channel
    Write {
        /// Bytes to send, as hex (e.g. 01 0xab ff)
        #[arg(value_name = "BYTE", required = true)]
        bytes: Vec<String>,
    },
    /// Show switch state and channel accounting
    Status,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = CtlConfig::load(args.config.as_deref())?;
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    logging::setup_logging(level)?;

    match args.command {
        Command::List => commands::list(&config),
        Command::Switches => commands::switches(&config),
        Command::Watch { count } => commands::watch(&config, count),
        Command::Read { len } => commands::read(&config, len),
        Command::Write { bytes } => commands::write(&config, &bytes),
        Command::Status => commands::status(&config),
    }
}
