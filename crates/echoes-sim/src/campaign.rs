//! Runs many seeds and collects which ones broke an invariant.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::network::FaultConfig;
use crate::oracle::{ConvergenceOracle, InvariantViolation, OracleResult};
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Parameters shared by every seed of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub sites: usize,
    pub rounds: u64,
    pub emit_percent: u8,
    pub sessions_per_round: usize,
    pub disconnect_percent: u8,
    pub request_batch: u32,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            sites: sim.sites,
            rounds: sim.rounds,
            emit_percent: sim.emit_percent,
            sessions_per_round: sim.sessions_per_round,
            disconnect_percent: sim.fault.disconnect_percent,
            request_batch: sim.fault.request_batch,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            sites: self.sites,
            rounds: self.rounds,
            emit_percent: self.emit_percent,
            sessions_per_round: self.sessions_per_round,
            fault: FaultConfig {
                disconnect_percent: self.disconnect_percent,
                request_batch: self.request_batch,
                ..FaultConfig::default()
            },
        }
    }

    /// # Errors
    ///
    /// When a parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.sites == 0 {
            bail!("sites must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.emit_percent > 100 || self.disconnect_percent > 100 {
            bail!("percentages must be within 0..=100");
        }
        if self.disconnect_percent == 100 && self.sessions_per_round > 0 {
            bail!("disconnect_percent of 100 never lets a session deliver");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// Lowest failing seed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds in which a disconnect or a rewind actually happened.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A replayed seed with everything needed to debug it.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run every seed in `config.seed_range`.
///
/// # Errors
///
/// When the config is invalid or a simulation fails internally. Invariant
/// violations are reported, not returned as errors.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };

    for seed in config.seed_range.clone() {
        let trace = replay_seed(seed, config)?;
        report.seeds_run += 1;
        if trace.result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }
        if trace.oracle.passed {
            report.seeds_passed += 1;
            continue;
        }
        warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
        report.first_failure.get_or_insert(seed);
        report.failures.push(SeedFailure {
            seed,
            violations: trace.oracle.violations.iter().map(format_violation).collect(),
        });
    }

    info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        interesting = report.interesting_states_reached,
        "campaign complete"
    );
    Ok(report)
}

/// Run one seed. The inner `Result` separates a pass from invariant
/// violations.
///
/// # Errors
///
/// When the simulation itself fails.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let trace = replay_seed(seed, config)?;
    if trace.oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(trace.oracle.violations))
    }
}

/// Rerun a seed and keep its full trace.
///
/// # Errors
///
/// When config validation or the simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = ConvergenceOracle::check_all(&result);
    Ok(DetailedTrace { result, oracle })
}

/// One line per violation.
#[must_use]
pub fn format_violation(violation: &InvariantViolation) -> String {
    match violation {
        InvariantViolation::Convergence {
            site_a,
            site_b,
            digest_a,
            digest_b,
        } => format!("Convergence: sites {site_a} and {site_b} differ ({digest_a} vs {digest_b})"),
        InvariantViolation::PrefixCausality {
            observer,
            origin,
            missing,
            present,
        } => format!(
            "PrefixCausality: site {observer} holds {present} from {origin} but is missing {missing}"
        ),
        InvariantViolation::Idempotence { site, event } => {
            format!("Idempotence: reinserting {event} changed site {site}")
        }
        InvariantViolation::Liveness {
            site_a,
            site_b,
            steps,
        } => format!("Liveness: session {site_a}<->{site_b} stalled after {steps} steps"),
        InvariantViolation::Protocol {
            site_a,
            site_b,
            message,
        } => format!("Protocol: session {site_a}<->{site_b} failed: {message}"),
        InvariantViolation::Completeness { site, missing } => {
            format!("Completeness: site {site} never received {missing}")
        }
    }
}
