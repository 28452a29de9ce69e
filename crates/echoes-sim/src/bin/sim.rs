#![forbid(unsafe_code)]

use std::env;

use anyhow::{Result, bail};
use clap::Parser;
use echoes_sim::campaign::{CampaignConfig, run_campaign};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Deterministic sync simulation: random sites, random sessions, injected
/// disconnects, then invariant checks.
#[derive(Parser, Debug)]
#[command(name = "sim", version, about)]
struct Args {
    /// First seed to run.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Number of consecutive seeds to run.
    #[arg(long, default_value_t = 1)]
    seeds: u64,

    #[arg(long, default_value_t = 4)]
    sites: usize,

    #[arg(long, default_value_t = 24)]
    rounds: u64,

    /// Chance, per delivered frame, of dropping the whole session.
    #[arg(long, default_value_t = 2)]
    disconnect_percent: u8,

    /// Credit granted per request.
    #[arg(long, default_value_t = 4)]
    request_batch: u32,

    /// Print the campaign report as JSON.
    #[arg(long)]
    json: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ECHOES_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "echoes=debug,info"
        } else {
            "echoes=info,warn"
        })
    });

    let format = env::var("ECHOES_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);
    match format.as_str() {
        "json" => registry.with(fmt::layer().json().with_ansi(false)).init(),
        _ => registry.with(fmt::layer().compact()).init(),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = CampaignConfig {
        seed_range: args.seed..args.seed.saturating_add(args.seeds),
        sites: args.sites,
        rounds: args.rounds,
        disconnect_percent: args.disconnect_percent,
        request_batch: args.request_batch,
        ..CampaignConfig::default()
    };
    let report = run_campaign(&config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "seeds run={} passed={} interesting={}",
            report.seeds_run, report.seeds_passed, report.interesting_states_reached
        );
        for failure in &report.failures {
            println!("seed {}:", failure.seed);
            for violation in &failure.violations {
                println!("  {violation}");
            }
        }
    }

    if let Some(seed) = report.first_failure {
        bail!("invariants violated; replay with --seed {seed}");
    }
    Ok(())
}
