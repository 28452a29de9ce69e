//! echoes-sim library.
//!
//! Deterministic simulation of many sites emitting events and syncing in
//! random pairs through the pure protocol roles, with injected
//! interleavings and disconnects. A final fault-free full-mesh sync is
//! followed by the [`oracle`] checks.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `debug!`, `trace!`).

pub mod campaign;
pub mod network;
pub mod oracle;
pub mod replica;
pub mod rng;

use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use echoes_core::{EventIdentifier, SiteIdentifier};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::network::{FaultConfig, SessionOutcome, SimulatedNetwork};
use crate::replica::{ReplicaState, SimulatedReplica};
use crate::rng::DeterministicRng;

pub use campaign::{CampaignConfig, CampaignReport, run_campaign};

/// Parameters of one simulated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub sites: usize,
    pub rounds: u64,
    /// Chance per site per round of emitting an event.
    pub emit_percent: u8,
    /// Random pairwise sessions per round.
    pub sessions_per_round: usize,
    pub fault: FaultConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            sites: 4,
            rounds: 24,
            emit_percent: 60,
            sessions_per_round: 2,
            fault: FaultConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEventKind {
    Emit {
        site: SiteIdentifier,
        id: EventIdentifier,
    },
    Session(SessionOutcome),
    /// One pass of the closing full-mesh sync.
    FinalSync { pass: usize, transferred: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

/// Everything the oracle needs from a run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub trace: Vec<TraceEvent>,
    /// Every event emitted, in emission order.
    pub emitted: Vec<EventIdentifier>,
    /// Replicas as the faulty rounds left them.
    pub before_final_sync: Vec<SimulatedReplica>,
    /// Replicas after the final sync.
    pub replicas: Vec<SimulatedReplica>,
    pub states: Vec<ReplicaState>,
    /// A disconnect cut a session short or a late event forced a rewind.
    pub interesting_state_reached: bool,
}

impl SimulationResult {
    /// Session outcomes in trace order.
    pub fn sessions(&self) -> impl Iterator<Item = &SessionOutcome> {
        self.trace.iter().filter_map(|event| match &event.kind {
            TraceEventKind::Session(outcome) => Some(outcome),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    replicas: Vec<SimulatedReplica>,
}

impl Simulator {
    /// Build the replicas for `config`. Site identifiers are drawn from the
    /// seed, so their relative order differs between runs.
    ///
    /// # Errors
    ///
    /// When there are no sites, or more than a `u32` can number.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.sites == 0 {
            bail!("a simulation needs at least one site");
        }
        u32::try_from(config.sites).context("too many sites")?;

        let mut rng = DeterministicRng::new(config.seed);
        let mut ids = BTreeSet::new();
        let mut replicas = Vec::with_capacity(config.sites);
        while replicas.len() < config.sites {
            let raw = u32::try_from(rng.next_u64() >> 32).unwrap_or(u32::MAX);
            let Some(site) = SiteIdentifier::new(raw) else {
                continue;
            };
            if ids.insert(site) {
                replicas.push(SimulatedReplica::new(site));
            }
        }
        Ok(Self {
            config,
            rng,
            replicas,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run every round, then sync all pairs without faults until nothing
    /// moves.
    ///
    /// # Errors
    ///
    /// When a replica rejects one of its own events.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let network = SimulatedNetwork::new(self.config.fault);
        let mut trace = Vec::new();
        let mut emitted = Vec::new();
        let mut interesting = false;

        for round in 0..self.config.rounds {
            for (index, replica) in self.replicas.iter_mut().enumerate() {
                if !self.rng.hit_rate_percent(self.config.emit_percent) {
                    continue;
                }
                let payload = format!("{}.{};", index, emitted.len());
                let id = replica
                    .emit(&payload)
                    .with_context(|| format!("site {} emitting", replica.site()))?;
                emitted.push(id);
                trace.push(TraceEvent {
                    round,
                    kind: TraceEventKind::Emit {
                        site: replica.site(),
                        id,
                    },
                });
            }

            for _ in 0..self.config.sessions_per_round {
                let Some((a, b)) = self.pick_pair() else {
                    break;
                };
                let mut session_rng = self.rng.fork();
                let (left, right) = pair_mut(&mut self.replicas, a, b);
                let outcome = network.run_session(left, right, &mut session_rng);
                interesting |= outcome.disconnected || outcome.late_inserts > 0;
                trace.push(TraceEvent {
                    round,
                    kind: TraceEventKind::Session(outcome),
                });
            }
        }

        let before_final_sync = self.replicas.clone();
        self.final_sync(&mut trace);

        let states: Vec<ReplicaState> = self.replicas.iter().map(SimulatedReplica::state).collect();
        info!(
            seed = self.config.seed,
            sites = self.replicas.len(),
            events = emitted.len(),
            interesting,
            "simulation complete"
        );
        Ok(SimulationResult {
            trace,
            emitted,
            before_final_sync,
            replicas: self.replicas.clone(),
            states,
            interesting_state_reached: interesting,
        })
    }

    /// Fault-free sessions over every pair, repeated until a pass transfers
    /// nothing. Two passes always suffice; the bound only guards bugs.
    fn final_sync(&mut self, trace: &mut Vec<TraceEvent>) {
        let network = SimulatedNetwork::new(self.config.fault.fault_free());
        let count = self.replicas.len();
        for pass in 0..=count {
            let mut transferred = 0;
            for a in 0..count {
                for b in a + 1..count {
                    let mut session_rng = self.rng.fork();
                    let (left, right) = pair_mut(&mut self.replicas, a, b);
                    let outcome = network.run_session(left, right, &mut session_rng);
                    transferred += outcome.transferred;
                    if outcome.stalled || outcome.failure.is_some() {
                        trace.push(TraceEvent {
                            round: self.config.rounds,
                            kind: TraceEventKind::Session(outcome),
                        });
                    }
                }
            }
            debug!(pass, transferred, "final sync pass");
            trace.push(TraceEvent {
                round: self.config.rounds,
                kind: TraceEventKind::FinalSync { pass, transferred },
            });
            if transferred == 0 {
                break;
            }
        }
    }

    fn pick_pair(&mut self) -> Option<(usize, usize)> {
        let count = self.replicas.len();
        if count < 2 {
            return None;
        }
        let a = self.rng.pick(count)?;
        let offset = self.rng.pick(count - 1)?;
        let b = (a + 1 + offset) % count;
        Some((a, b))
    }
}

/// Two distinct elements of `items`, mutably.
fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    if a < b {
        let (head, tail) = items.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = items.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}
