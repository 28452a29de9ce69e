use std::collections::BTreeMap;

use echoes_core::{EventIdentifier, SiteIdentifier};
use serde::Serialize;

use crate::SimulationResult;
use crate::replica::{ReplicaState, SimulatedReplica};

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Failures accumulate.
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

/// Diagnostic for a single failed invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "invariant", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// Two replicas disagree after the final sync.
    Convergence {
        site_a: SiteIdentifier,
        site_b: SiteIdentifier,
        digest_a: String,
        digest_b: String,
    },

    /// `observer` holds a later event of `origin` without an earlier one.
    PrefixCausality {
        observer: SiteIdentifier,
        origin: SiteIdentifier,
        missing: EventIdentifier,
        present: EventIdentifier,
    },

    /// Inserting an already-held event changed the replica.
    Idempotence {
        site: SiteIdentifier,
        event: EventIdentifier,
    },

    /// A session ran out of frames, or steps, before every role finished.
    Liveness {
        site_a: SiteIdentifier,
        site_b: SiteIdentifier,
        steps: usize,
    },

    /// A session closed on a codec, protocol or insert error.
    Protocol {
        site_a: SiteIdentifier,
        site_b: SiteIdentifier,
        message: String,
    },

    /// An emitted event never reached `site`.
    Completeness {
        site: SiteIdentifier,
        missing: EventIdentifier,
    },
}

/// Invariant checks over a finished simulation.
///
/// 1. **Convergence**: every replica has the same digest and model.
/// 2. **Prefix causality**: each replica holds a prefix of every site's
///    events, also mid-run.
/// 3. **Idempotence**: reinserting held events is a no-op.
/// 4. **Sessions**: none stalled and none failed.
/// 5. **Completeness**: every emitted event reached every replica.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    #[must_use]
    pub fn check_convergence(states: &[ReplicaState]) -> OracleResult {
        let mut violations = Vec::new();
        for (i, a) in states.iter().enumerate() {
            for b in &states[i + 1..] {
                if a.digest != b.digest || a.model != b.model {
                    violations.push(InvariantViolation::Convergence {
                        site_a: a.site,
                        site_b: b.site,
                        digest_a: a.digest.clone(),
                        digest_b: b.digest.clone(),
                    });
                }
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Check that what each replica holds of each site is a prefix of what
    /// that site emitted, in the site's own order.
    #[must_use]
    pub fn check_prefix_causality(
        replicas: &[SimulatedReplica],
        emitted: &[EventIdentifier],
    ) -> OracleResult {
        let mut per_origin: BTreeMap<SiteIdentifier, Vec<EventIdentifier>> = BTreeMap::new();
        for id in emitted {
            per_origin.entry(id.site()).or_default().push(*id);
        }

        let mut violations = Vec::new();
        for replica in replicas {
            for (origin, sequence) in &per_origin {
                let held: Vec<EventIdentifier> =
                    replica.log().events_of(*origin).map(|event| event.id).collect();
                if let Some(violation) = first_gap(replica.site(), *origin, sequence, &held) {
                    violations.push(violation);
                }
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Reinsert every held event into a copy of `replica` and compare.
    #[must_use]
    pub fn check_idempotence(replica: &SimulatedReplica) -> OracleResult {
        let before = replica.state();
        let mut copy = replica.clone();
        let mut violations = Vec::new();
        for event in replica.log().events() {
            let id = event.id;
            let changed = match copy.insert(id.seqno(), id.site(), &event.payload()) {
                Ok(inserted) => inserted || copy.state() != before,
                Err(_) => true,
            };
            if changed {
                violations.push(InvariantViolation::Idempotence {
                    site: replica.site(),
                    event: id,
                });
                copy = replica.clone();
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Every session either terminated or was cut by an injected
    /// disconnect, and none failed.
    #[must_use]
    pub fn check_sessions(result: &SimulationResult) -> OracleResult {
        let mut violations = Vec::new();
        for outcome in result.sessions() {
            if outcome.stalled {
                violations.push(InvariantViolation::Liveness {
                    site_a: outcome.site_a,
                    site_b: outcome.site_b,
                    steps: outcome.steps,
                });
            }
            if let Some(message) = &outcome.failure {
                violations.push(InvariantViolation::Protocol {
                    site_a: outcome.site_a,
                    site_b: outcome.site_b,
                    message: message.clone(),
                });
            }
        }
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_completeness(
        replicas: &[SimulatedReplica],
        emitted: &[EventIdentifier],
    ) -> OracleResult {
        let mut violations = Vec::new();
        for replica in replicas {
            if let Some(missing) = emitted
                .iter()
                .find(|id| !replica.log().contains(id.seqno(), id.site()))
            {
                violations.push(InvariantViolation::Completeness {
                    site: replica.site(),
                    missing: *missing,
                });
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Run every check. Prefix causality is checked on both the mid-run
    /// and the final replicas.
    #[must_use]
    pub fn check_all(result: &SimulationResult) -> OracleResult {
        let idempotence = result
            .replicas
            .iter()
            .map(Self::check_idempotence)
            .fold(OracleResult::pass(), OracleResult::merge);

        Self::check_convergence(&result.states)
            .merge(Self::check_prefix_causality(
                &result.before_final_sync,
                &result.emitted,
            ))
            .merge(Self::check_prefix_causality(&result.replicas, &result.emitted))
            .merge(idempotence)
            .merge(Self::check_sessions(result))
            .merge(Self::check_completeness(&result.replicas, &result.emitted))
    }
}

fn first_gap(
    observer: SiteIdentifier,
    origin: SiteIdentifier,
    sequence: &[EventIdentifier],
    held: &[EventIdentifier],
) -> Option<InvariantViolation> {
    let matched = sequence
        .iter()
        .zip(held)
        .take_while(|(expected, got)| expected == got)
        .count();
    if matched == held.len() {
        return None;
    }
    let present = held[matched];
    let missing = sequence.get(matched).copied().unwrap_or(present);
    Some(InvariantViolation::PrefixCausality {
        observer,
        origin,
        missing,
        present,
    })
}
