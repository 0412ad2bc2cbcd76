//! CLI for the rangefetch engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use rangefetch_core::config;
use std::path::PathBuf;

use commands::{run_config, run_fetch, FetchArgs};

/// Top-level CLI for rangefetch.
#[derive(Debug, Parser)]
#[command(name = "rangefetch")]
#[command(about = "Fetch a URL as parallel byte ranges and reassemble it in order", long_about = None)]
pub struct Cli {
    /// Use this config file instead of the XDG default.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

/// Which engine driver runs the fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Driver {
    /// Blocking workers with retry and overload backoff.
    Sync,
    /// Fire-and-forget dispatch, responses routed through the completion queue.
    Async,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch a URL through the range engine.
    Fetch {
        /// Direct HTTP/HTTPS URL.
        url: String,

        /// Write the body here instead of stdout.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Caller Range header value, e.g. "bytes=1000-".
        #[arg(long, value_name = "RANGE")]
        range: Option<String>,

        /// Bytes per sub-range request (overrides config).
        #[arg(long, value_name = "BYTES")]
        fetch_limit: Option<u64>,

        /// Concurrent sub-range fetches (overrides config).
        #[arg(long, value_name = "N")]
        workers: Option<usize>,

        #[arg(long, value_enum, default_value_t = Driver::Sync)]
        driver: Driver,

        /// Print the SHA-256 of the delivered body to stderr.
        #[arg(long)]
        sha256: bool,

        /// Print engine counters as JSON to stderr when done.
        #[arg(long)]
        stats: bool,
    },

    /// Print the effective configuration as TOML.
    Config,
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = match &cli.config {
            Some(path) => config::load_or_init_at(path)?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                url,
                output,
                range,
                fetch_limit,
                workers,
                driver,
                sha256,
                stats,
            } => run_fetch(
                &cfg,
                FetchArgs {
                    url,
                    output,
                    range,
                    fetch_limit,
                    workers,
                    driver,
                    sha256,
                    stats,
                },
            )?,
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}
