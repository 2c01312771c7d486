//! Satellite Return-Link Terminal Simulator
//!
//! Runs a population of terminals sharing one return link: an NCC hands out
//! dedicated slots in TBTPs while the terminals fall back to contention
//! access in the random access frames.

mod config;
mod ncc;
mod sim;
mod traffic;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use config::ScenarioConfig;
use sim::{SimReport, Simulation};

/// Satellite return-link terminal simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the scenario file (YAML, or TOML with a .toml extension)
    #[arg(short, long, default_value = "ut/config/default.yml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Simulated time in seconds
    #[arg(long)]
    length_s: Option<f64>,

    /// Base random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Number of terminals
    #[arg(long)]
    terminals: Option<usize>,

    /// Write the run statistics as JSON to this file
    #[arg(long)]
    stats_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting satellite return-link terminal simulator");
    info!("Scenario file: {}", args.config.display());

    let mut scenario = ScenarioConfig::from_file(&args.config)?;
    if let Some(length_s) = args.length_s {
        scenario.simulation.length_s = length_s;
    }
    if let Some(seed) = args.seed {
        scenario.simulation.seed = seed;
    }
    if let Some(terminals) = args.terminals {
        scenario.terminals.count = terminals;
    }

    info!("Scenario:");
    info!("  Terminals: {}", scenario.terminals.count);
    info!("  Length: {} s", scenario.simulation.length_s);
    info!("  Seed: {}", scenario.simulation.seed);
    info!("  Random access: {:?}", scenario.terminals.random_access.mode);

    let stop = Arc::new(AtomicBool::new(false));
    let simulation = Simulation::build(&scenario, Arc::clone(&stop))?;
    let mut handle = tokio::task::spawn_blocking(move || simulation.run());

    // Wait for completion or shutdown signal
    let report = tokio::select! {
        result = &mut handle => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            stop.store(true, Ordering::Relaxed);
            handle.await??
        }
    };

    log_report(&report);

    if let Some(path) = &args.stats_out {
        let json = serde_json::to_string_pretty(&report)?;
        if let Err(e) = std::fs::write(path, json) {
            error!("Failed to write statistics to {}: {}", path.display(), e);
            return Err(e.into());
        }
        info!("Statistics written to {}", path.display());
    }

    info!("Simulator shutdown complete");
    Ok(())
}

fn log_report(report: &SimReport) {
    let totals = &report.totals;

    info!("Run statistics:");
    info!("  Simulated: {:.3} s, {} events", report.sim_time_s, report.events);
    info!("  TBTPs issued: {}", report.tbtps_issued);
    info!("  Dedicated slots scheduled: {}", totals.da_slots_scheduled);
    info!(
        "  Random access: {} attempts, {} slots claimed",
        totals.ra_attempts, totals.ra_slots_claimed
    );
    info!(
        "  Bursts: {}, units: {}, bytes: {}",
        totals.bursts_sent, totals.units_sent, totals.bytes_sent
    );
    info!("  Unused opportunities: {}", totals.empty_opportunities);
    info!("  Same-slot collisions: {}", report.phy.collisions);

    for terminal in &report.terminals {
        info!(
            "  UT {}: {} bursts, {} bytes sent, {} bytes queued",
            terminal.address, terminal.stats.bursts_sent, terminal.stats.bytes_sent, terminal.queued_bytes
        );
    }
}
