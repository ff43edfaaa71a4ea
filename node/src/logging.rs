//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. Output goes to stderr so that
//! `simulate` can print its JSON summary on stdout and be piped into `jq`.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "cash_node=info,cash_contracts=info,cash_protocol=warn,tower_http=info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable output with file and line.
    #[default]
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
}

/// Initialize the global tracing subscriber.
///
/// Call this exactly once, early in `main()`. `RUST_LOG` overrides
/// `default_directives` when set:
///
/// ```text
/// RUST_LOG=cash_contracts=debug,cash_node=info
/// ```
pub fn init_logging(default_directives: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
                .init();
        }
    }

    tracing::debug!(?format, "logging initialized");
}
