//! Post-run invariant checks.

use std::collections::BTreeMap;
use std::fmt;

use manysync_core::DocumentEngine;
use manysync_core::VectorClock;
use manysync_core::memory::{MemoryDoc, MemoryEngine};
use serde::Serialize;

use crate::network::Node;
use crate::rng::SimRng;
use crate::{ReplicaOutcome, SimulationResult};

/// Shuffled replays tried by [`ConvergenceOracle::check_commutativity`].
pub const COMMUTATIVITY_PERMUTATIONS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
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

    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Messages were still moving when the drain gave up.
    NotQuiescent,
    /// Two replicas ended with different documents.
    Divergence {
        replica_a: Node,
        replica_b: Node,
        clock_a: VectorClock,
        clock_b: VectorClock,
        differing_keys: Vec<String>,
    },
    /// A replica still holds changes it could never integrate.
    StuckChanges { replica: Node, pending: usize },
    /// Re-applying a replica's own history changed it.
    Idempotence { replica: Node },
    /// Applying the history in another order gave another document.
    Commutativity { permutation_index: usize },
    /// A belief clock shrank between two observations.
    BeliefRegression { component: Node, step: usize },
    /// An authored change is missing from the converged document.
    LostEdits {
        actor: String,
        authored: u64,
        converged: u64,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotQuiescent => f.write_str("NotQuiescent: traffic never settled"),
            Self::Divergence {
                replica_a,
                replica_b,
                clock_a,
                clock_b,
                differing_keys,
            } => write!(
                f,
                "Divergence: {replica_a} {clock_a} vs {replica_b} {clock_b} \
                 (keys {differing_keys:?})"
            ),
            Self::StuckChanges { replica, pending } => {
                write!(f, "StuckChanges: {replica} holds {pending} unintegrated changes")
            }
            Self::Idempotence { replica } => {
                write!(f, "Idempotence: re-applying history changed {replica}")
            }
            Self::Commutativity { permutation_index } => {
                write!(f, "Commutativity: permutation {permutation_index} diverges")
            }
            Self::BeliefRegression { component, step } => {
                write!(f, "BeliefRegression: {component} belief shrank at step {step}")
            }
            Self::LostEdits {
                actor,
                authored,
                converged,
            } => write!(
                f,
                "LostEdits: {actor} authored {authored} changes, converged document has {converged}"
            ),
        }
    }
}

/// Summary of whether every replica ended in the same place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvergenceReport {
    pub converged: bool,
    /// Replicas that differ from the hub.
    pub divergent: Vec<Node>,
    /// Visible keys in the hub's document.
    pub key_count: usize,
}

/// Invariant checks over a finished run.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    /// Compare every replica against the first one (the hub).
    #[must_use]
    pub fn convergence_report(replicas: &[ReplicaOutcome]) -> ConvergenceReport {
        let Some((reference, rest)) = replicas.split_first() else {
            return ConvergenceReport {
                converged: true,
                divergent: Vec::new(),
                key_count: 0,
            };
        };
        let divergent: Vec<Node> = rest
            .iter()
            .filter(|replica| replica.doc != reference.doc)
            .map(|replica| replica.node)
            .collect();
        ConvergenceReport {
            converged: divergent.is_empty(),
            divergent,
            key_count: reference.doc.state().len(),
        }
    }

    #[must_use]
    pub fn check_quiescence(result: &SimulationResult) -> OracleResult {
        if result.quiesced {
            OracleResult::pass()
        } else {
            OracleResult::from_violations(vec![InvariantViolation::NotQuiescent])
        }
    }

    #[must_use]
    pub fn check_convergence(replicas: &[ReplicaOutcome]) -> OracleResult {
        let Some((reference, rest)) = replicas.split_first() else {
            return OracleResult::pass();
        };
        let violations = rest
            .iter()
            .filter(|replica| replica.doc != reference.doc)
            .map(|replica| InvariantViolation::Divergence {
                replica_a: reference.node,
                replica_b: replica.node,
                clock_a: reference.doc.clock().clone(),
                clock_b: replica.doc.clock().clone(),
                differing_keys: differing_keys(&reference.doc, &replica.doc),
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_no_stuck_changes(replicas: &[ReplicaOutcome]) -> OracleResult {
        let violations = replicas
            .iter()
            .filter(|replica| !replica.doc.pending().is_empty())
            .map(|replica| InvariantViolation::StuckChanges {
                replica: replica.node,
                pending: replica.doc.pending().len(),
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_idempotence(replicas: &[ReplicaOutcome]) -> OracleResult {
        let engine = MemoryEngine::default();
        let violations = replicas
            .iter()
            .filter(|replica| {
                let again = engine.apply_changes(&replica.doc, replica.doc.history());
                again != replica.doc
            })
            .map(|replica| InvariantViolation::Idempotence {
                replica: replica.node,
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Rebuild `reference` from shuffled copies of its history.
    #[must_use]
    pub fn check_commutativity(reference: &MemoryDoc, rng: &mut SimRng) -> OracleResult {
        let engine = MemoryEngine::default();
        let mut violations = Vec::new();
        for permutation_index in 0..COMMUTATIVITY_PERMUTATIONS {
            let mut changes = reference.history().to_vec();
            rng.shuffle(&mut changes);
            let rebuilt = engine.apply_changes(&MemoryDoc::new("oracle"), &changes);
            if &rebuilt != reference {
                violations.push(InvariantViolation::Commutativity { permutation_index });
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Every recorded belief series must be non-decreasing.
    #[must_use]
    pub fn check_belief_monotonicity(replicas: &[ReplicaOutcome]) -> OracleResult {
        let violations = replicas
            .iter()
            .flat_map(|replica| {
                replica
                    .beliefs
                    .windows(2)
                    .enumerate()
                    .filter(|(_, pair)| !pair[1].dominates(&pair[0]))
                    .map(|(step, _)| InvariantViolation::BeliefRegression {
                        component: replica.node,
                        step: step + 1,
                    })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Every change any actor authored must be in the hub's document.
    #[must_use]
    pub fn check_no_lost_edits(
        authored: &BTreeMap<String, u64>,
        replicas: &[ReplicaOutcome],
    ) -> OracleResult {
        let Some(reference) = replicas.first() else {
            return OracleResult::pass();
        };
        let violations = authored
            .iter()
            .filter_map(|(actor, &count)| {
                let converged = reference.doc.clock().get(actor);
                (converged < count).then(|| InvariantViolation::LostEdits {
                    actor: actor.clone(),
                    authored: count,
                    converged,
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Run every check.
    #[must_use]
    pub fn check_all(result: &SimulationResult, rng: &mut SimRng) -> OracleResult {
        let commutativity = result.replicas.first().map_or_else(OracleResult::pass, |hub| {
            Self::check_commutativity(&hub.doc, rng)
        });
        Self::check_quiescence(result)
            .merge(Self::check_convergence(&result.replicas))
            .merge(Self::check_no_stuck_changes(&result.replicas))
            .merge(Self::check_idempotence(&result.replicas))
            .merge(commutativity)
            .merge(Self::check_belief_monotonicity(&result.replicas))
            .merge(Self::check_no_lost_edits(&result.authored, &result.replicas))
    }
}

fn differing_keys(a: &MemoryDoc, b: &MemoryDoc) -> Vec<String> {
    let left = a.state();
    let right = b.state();
    let mut keys: Vec<String> = left
        .iter()
        .filter(|(key, value)| right.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .chain(
            right
                .keys()
                .filter(|key| !left.contains_key(*key))
                .cloned(),
        )
        .collect();
    keys.sort();
    keys
}
