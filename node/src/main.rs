// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CASH Operator Node
//!
//! Entry point for the `cash-node` binary. Parses CLI arguments, initializes
//! logging and metrics, deploys the protocol from a scenario, and either
//! prints the outcome or serves it.
//!
//! Subcommands:
//!
//! - `simulate`: run a scenario and print a JSON summary
//! - `serve`: run a scenario, then serve the API, metrics and a payout loop
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod scenario;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::RwLock;

use cli::{CashNodeCli, Commands};
use metrics::NodeMetrics;
use scenario::{Scenario, Simulation};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CashNodeCli::parse();

    match cli.command {
        Commands::Simulate(args) => simulate(args),
        Commands::Serve(args) => serve(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Runs every step of a scenario and prints the summary.
fn simulate(args: cli::SimulateArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_DIRECTIVES, args.log_format);

    let scenario = Scenario::from_file(&args.scenario)?;
    let mut simulation = Simulation::genesis(&scenario)?;
    let records = simulation.run(&scenario.steps);
    let failed = records.iter().filter(|r| !r.ok).count();
    tracing::info!(steps = records.len(), failed, "scenario finished");

    let summary = simulation.summary()?;
    let json = serde_json::to_string_pretty(&summary).context("failed to render summary")?;
    println!("{json}");

    if args.strict && failed > 0 {
        bail!("{failed} scenario step(s) failed");
    }
    Ok(())
}

/// Runs a scenario, then serves it: API server, metrics endpoint and the
/// payout loop.
async fn serve(args: cli::ServeArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_DIRECTIVES, args.log_format);

    tracing::info!(
        scenario = %args.scenario.display(),
        port = args.port,
        metrics_port = args.metrics_port,
        payout_interval_secs = args.payout_interval_secs,
        "starting cash-node"
    );

    // --- Protocol ---
    let scenario = Scenario::from_file(&args.scenario)?;
    let mut simulation = Simulation::genesis(&scenario)?;
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    for record in simulation.run(&scenario.steps) {
        node_metrics.record_step(record);
    }
    node_metrics.observe(simulation.protocol());

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            cash_protocol::config::PROTOCOL_VERSION,
        ),
        simulation: Arc::new(RwLock::new(simulation)),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state.clone());
    let api_addr = format!("{}:{}", args.bind, args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Payout loop ---
    let payout_loop = (args.payout_interval_secs > 0).then(|| {
        let state = app_state.clone();
        let period = Duration::from_secs(args.payout_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let mut simulation = state.simulation.write().await;
                match api::run_payout(&mut simulation, &state.metrics) {
                    Ok(payout) => tracing::info!(
                        time = payout.time,
                        next_payout_time = payout.next_payout_time,
                        to_dripper = %payout.to_dripper,
                        rebased = payout.rebased,
                        "scheduled payout"
                    ),
                    Err(err) => tracing::warn!(error = %format!("{err:#}"), "scheduled payout failed"),
                }
            }
        })
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    if let Some(handle) = payout_loop {
        handle.abort();
    }
    tracing::info!("cash-node stopped");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("cash-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", cash_protocol::config::PROTOCOL_VERSION);
    println!("rustc     {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first. If a
/// handler cannot be installed, that signal is never awaited.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(%err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
