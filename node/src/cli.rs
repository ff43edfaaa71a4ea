//! # CLI Interface
//!
//! Command-line structure for `cash-node`, built with `clap` derive. Every
//! flag can also come from a `CASH_*` environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// CASH protocol operator node.
///
/// Deploys the protocol from a scenario file, replays its scripted steps,
/// and either prints the outcome or keeps serving it over HTTP with a
/// periodic payout.
#[derive(Parser, Debug)]
#[command(
    name = "cash-node",
    about = "CASH protocol operator node",
    version,
    propagate_version = true
)]
pub struct CashNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scenario to completion and print a JSON summary on stdout.
    Simulate(SimulateArgs),
    /// Run a scenario, then serve the API and metrics with a payout loop.
    Serve(ServeArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Path to the scenario file (JSON).
    #[arg(long, short = 's', env = "CASH_SCENARIO")]
    pub scenario: PathBuf,

    #[arg(long, value_enum, env = "CASH_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Exit non-zero if any step failed.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Path to the scenario file (JSON).
    #[arg(long, short = 's', env = "CASH_SCENARIO")]
    pub scenario: PathBuf,

    /// Interface to bind both listeners on.
    #[arg(long, env = "CASH_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port for the REST API.
    #[arg(long, env = "CASH_API_PORT", default_value_t = 9841)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CASH_METRICS_PORT", default_value_t = 9842)]
    pub metrics_port: u16,

    /// Wall-clock seconds between payouts. Each payout fast-forwards the
    /// simulated clock to the next scheduled time. Zero disables the loop.
    #[arg(long, env = "CASH_PAYOUT_INTERVAL_SECS", default_value_t = 60)]
    pub payout_interval_secs: u64,

    #[arg(long, value_enum, env = "CASH_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}
