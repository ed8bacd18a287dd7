//! # debug-zoo
//!
//! Trigger classic defects on demand so debugging tools can be validated
//! against known-bad behaviour.
//!
//! ## Commands
//!
//! - `run`: Start the selected scenarios, wait, then shut them down
//! - `list`: Show the scenario catalog
//!
//! ## Example
//!
//! ```bash
//! # Leak a block and read a freed one, then exit
//! debug-zoo run --leak --use-after-free --hold 0
//!
//! # Module-parameter style, against the red-zoned mock allocator
//! debug-zoo --mock run --param race --param slab_poison=32 --hold 2
//!
//! # Run until Ctrl-C
//! debug-zoo run --lockdep
//! ```

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;

use commands::{list, run};
use config::Config;
use zoo_core::OverflowStyle;

/// Trigger classic memory and concurrency defects on demand.
#[derive(Parser, Debug)]
#[command(name = "debug-zoo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: config.toml in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the red-zoned mock allocator instead of the system heap
    #[arg(long, global = true)]
    mock: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the selected scenarios, wait, then shut them down
    Run(RunArgs),

    /// Show the scenario catalog
    List,
}

/// Scenario selection for `run`. Merged with the config file's `[scenarios]`.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Leak a heap block
    #[arg(long)]
    pub leak: bool,

    /// Read a heap block after releasing it
    #[arg(long)]
    pub use_after_free: bool,

    /// Acquire two locks in opposite orders from two threads
    #[arg(long)]
    pub lockdep: bool,

    /// Increment an unsynchronized counter from two threads
    #[arg(long)]
    pub race: bool,

    /// Write past the end of a SIZE-byte buffer
    #[arg(long, value_name = "SIZE", num_args = 0..=1, require_equals = true)]
    pub slab_poison: Option<Option<usize>>,

    /// How the out-of-bounds write overruns
    #[arg(long, value_enum)]
    pub overflow_style: Option<StyleArg>,

    /// Module-parameter style flag, e.g. `race` or `slab_poison=32`
    #[arg(long = "param", value_name = "KEY[=VALUE]")]
    pub params: Vec<String>,

    /// Seconds to wait before shutdown (default: wait for Ctrl-C)
    #[arg(long, value_name = "SECS")]
    pub hold: Option<u64>,
}

/// Overflow style as accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StyleArg {
    /// One byte at offset SIZE
    OffByOne,
    /// Unbounded copy of a message longer than the buffer
    Formatted,
}

impl From<StyleArg> for OverflowStyle {
    fn from(style: StyleArg) -> Self {
        match style {
            StyleArg::OffByOne => OverflowStyle::OffByOne,
            StyleArg::Formatted => OverflowStyle::Formatted,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "CLI arguments parsed");

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            let status = run::run(&config, &args, cli.mock).await?;
            Ok(ExitCode::from(u8::try_from(status).unwrap_or(1)))
        }
        Commands::List => {
            list::run(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}
