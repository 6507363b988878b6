//! Adversary footprint selection.
//!
//! The adversary controls a bounded set of guards and a bounded set of
//! exits. Each set is chosen from the eligible pool by a bandwidth-weighted
//! draw without replacement and then repaired by swaps until its aggregate
//! bandwidth lies within tolerance of the target. Budgets the pool cannot
//! satisfy are rejected instead of silently shrunk.

use std::collections::BTreeSet;
use std::fmt;

use rand::Rng;
use tracing::debug;

use crate::catalog::{ConsensusEpoch, Position};
use crate::config::AdversaryConfig;
use crate::path::weighted_order;
use crate::relay::{Relay, RelayFlags, RelayId};

/// Errors from adversary selection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdversaryError {
    #[error("Adversary {position} budget ({budget}) is infeasible: {reason}")]
    BudgetInfeasible {
        position: Position,
        budget: AdversaryBudget,
        reason: String,
    },
}

/// Count and aggregate-bandwidth target for one relay role.
///
/// Bandwidth is in consensus-weight units. Zero means unconstrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdversaryBudget {
    pub count: usize,
    pub bandwidth: u64,
}

impl AdversaryBudget {
    /// Creates budget from count and bandwidth targets.
    pub fn new(count: usize, bandwidth: u64) -> Self {
        Self { count, bandwidth }
    }

    /// Checks whether the budget asks for nothing.
    pub fn is_empty(&self) -> bool {
        self.count == 0 && self.bandwidth == 0
    }
}

impl fmt::Display for AdversaryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "count={} bandwidth={}", self.count, self.bandwidth)
    }
}

/// Whether each end of a circuit is adversary-controlled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ObservationRecord {
    pub guard_compromised: bool,
    pub exit_compromised: bool,
}

impl ObservationRecord {
    /// Checks whether both ends are compromised.
    pub fn is_correlatable(&self) -> bool {
        self.guard_compromised && self.exit_compromised
    }
}

/// Compromised guards and exits for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdversaryFootprint {
    guards: BTreeSet<RelayId>,
    exits: BTreeSet<RelayId>,
    guard_bandwidth: u64,
    exit_bandwidth: u64,
}

impl AdversaryFootprint {
    /// Footprint controlling nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates footprint from explicit relay sets.
    pub fn from_relays(guards: &[&Relay], exits: &[&Relay]) -> Self {
        Self {
            guards: guards.iter().map(|relay| relay.id).collect(),
            exits: exits.iter().map(|relay| relay.id).collect(),
            guard_bandwidth: guards.iter().map(|relay| relay.bandwidth).sum(),
            exit_bandwidth: exits.iter().map(|relay| relay.bandwidth).sum(),
        }
    }

    /// Compromised guard identifiers.
    pub fn guards(&self) -> &BTreeSet<RelayId> {
        &self.guards
    }

    /// Compromised exit identifiers.
    pub fn exits(&self) -> &BTreeSet<RelayId> {
        &self.exits
    }

    /// Aggregate bandwidth of compromised guards.
    pub fn guard_bandwidth(&self) -> u64 {
        self.guard_bandwidth
    }

    /// Aggregate bandwidth of compromised exits.
    pub fn exit_bandwidth(&self) -> u64 {
        self.exit_bandwidth
    }

    /// Observation of a circuit through `guard` and `exit`.
    pub fn observe(&self, guard: RelayId, exit: RelayId) -> ObservationRecord {
        ObservationRecord {
            guard_compromised: self.guards.contains(&guard),
            exit_compromised: self.exits.contains(&exit),
        }
    }
}

/// Chooses adversary footprints under count and bandwidth budgets.
#[derive(Debug, Clone)]
pub struct AdversaryModel {
    config: AdversaryConfig,
    required_flags: RelayFlags,
}

impl AdversaryModel {
    /// Creates model; `required_flags` restricts the eligible pools like path selection does.
    pub fn new(config: AdversaryConfig, required_flags: RelayFlags) -> Self {
        Self {
            config,
            required_flags,
        }
    }

    /// Selects compromised guards and exits from `epoch`.
    ///
    /// The two sets are chosen independently; a relay with both flags may
    /// appear in both.
    ///
    /// # Errors
    ///
    /// - `AdversaryError::BudgetInfeasible` - If either budget cannot be met by the eligible pool
    pub fn select<R: Rng + ?Sized>(
        &self,
        epoch: &ConsensusEpoch,
        rng: &mut R,
    ) -> Result<AdversaryFootprint, AdversaryError> {
        let guards = self.select_role(epoch, Position::Guard, self.config.guards, rng)?;
        let exits = self.select_role(epoch, Position::Exit, self.config.exits, rng)?;
        Ok(AdversaryFootprint::from_relays(&guards, &exits))
    }

    fn select_role<'e, R: Rng + ?Sized>(
        &self,
        epoch: &'e ConsensusEpoch,
        position: Position,
        budget: AdversaryBudget,
        rng: &mut R,
    ) -> Result<Vec<&'e Relay>, AdversaryError> {
        if budget.is_empty() {
            return Ok(Vec::new());
        }
        let pool: Vec<&Relay> = epoch
            .relays()
            .iter()
            .filter(|relay| position.admits(relay, self.required_flags))
            .collect();
        let infeasible = |reason: String| AdversaryError::BudgetInfeasible {
            position,
            budget,
            reason,
        };

        let bandwidths: Vec<u64> = pool.iter().map(|relay| relay.bandwidth).collect();
        let bounds = Bounds::new(budget.bandwidth, self.config.tolerance);
        check_feasibility(&bandwidths, budget, bounds).map_err(infeasible)?;

        let weights: Vec<f64> = bandwidths.iter().map(|bw| *bw as f64).collect();
        let order = weighted_order(&weights, rng);

        let count = if budget.count > 0 {
            budget.count
        } else {
            shortest_prefix(&order, &bandwidths, bounds.low)
        };

        let mut selection = Selection::new(&order, &bandwidths, count);
        if budget.bandwidth > 0 {
            let swaps = selection.repair(bounds, self.config.max_swaps);
            debug!(%position, swaps, total = selection.total, "Repaired adversary bandwidth");
            if !bounds.contains(selection.total) {
                return Err(infeasible(format!(
                    "closest selection of {count} relays has bandwidth {} outside [{}, {}]",
                    selection.total, bounds.low, bounds.high
                )));
            }
        }

        let mut chosen: Vec<&Relay> = selection.chosen.iter().map(|index| pool[*index]).collect();
        chosen.sort_by_key(|relay| relay.id);
        Ok(chosen)
    }
}

/// Accepted bandwidth interval around a target.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    low: u64,
    high: u64,
}

impl Bounds {
    fn new(target: u64, tolerance: f64) -> Self {
        if target == 0 {
            return Self { low: 0, high: u64::MAX };
        }
        let target = target as f64;
        Self {
            low: (target * (1.0 - tolerance)).ceil() as u64,
            high: (target * (1.0 + tolerance)).floor() as u64,
        }
    }

    fn contains(&self, total: u64) -> bool {
        self.low <= total && total <= self.high
    }

    fn distance(&self, total: u64) -> u64 {
        if total < self.low {
            self.low - total
        } else {
            total.saturating_sub(self.high)
        }
    }
}

fn check_feasibility(bandwidths: &[u64], budget: AdversaryBudget, bounds: Bounds) -> Result<(), String> {
    if budget.count > bandwidths.len() {
        return Err(format!(
            "requested {} relays but only {} are eligible",
            budget.count,
            bandwidths.len()
        ));
    }
    let total: u64 = bandwidths.iter().sum();
    if total < bounds.low {
        return Err(format!("eligible pool offers only {total} bandwidth"));
    }
    if budget.count > 0 && budget.bandwidth > 0 {
        let mut sorted = bandwidths.to_vec();
        sorted.sort_unstable();
        let smallest: u64 = sorted[..budget.count].iter().sum();
        let largest: u64 = sorted[sorted.len() - budget.count..].iter().sum();
        if largest < bounds.low {
            return Err(format!(
                "the {} largest relays offer only {largest} bandwidth",
                budget.count
            ));
        }
        if smallest > bounds.high {
            return Err(format!(
                "the {} smallest relays already exceed the target with {smallest}",
                budget.count
            ));
        }
    }
    Ok(())
}

fn shortest_prefix(order: &[usize], bandwidths: &[u64], low: u64) -> usize {
    let mut total = 0;
    for (taken, index) in order.iter().enumerate() {
        if total >= low && taken > 0 {
            return taken;
        }
        total += bandwidths[*index];
    }
    order.len()
}

/// Chosen and unchosen pool indices during swap repair.
struct Selection<'b> {
    bandwidths: &'b [u64],
    chosen: Vec<usize>,
    /// Unchosen indices sorted by (bandwidth, index)
    rest: Vec<usize>,
    total: u64,
}

impl<'b> Selection<'b> {
    fn new(order: &[usize], bandwidths: &'b [u64], count: usize) -> Self {
        let chosen = order[..count].to_vec();
        let mut rest = order[count..].to_vec();
        rest.sort_by_key(|index| (bandwidths[*index], *index));
        let total = chosen.iter().map(|index| bandwidths[*index]).sum();
        Self {
            bandwidths,
            chosen,
            rest,
            total,
        }
    }

    /// Applies best-improvement swaps until the total is within bounds.
    fn repair(&mut self, bounds: Bounds, max_swaps: usize) -> usize {
        let mut swaps = 0;
        while swaps < max_swaps && !bounds.contains(self.total) {
            let Some((slot, position, total)) = self.best_swap(bounds) else {
                break;
            };
            let outgoing = self.chosen[slot];
            let incoming = self.rest.remove(position);
            self.chosen[slot] = incoming;
            let bandwidths = self.bandwidths;
            let insert_at = self
                .rest
                .partition_point(|index| (bandwidths[*index], *index) < (bandwidths[outgoing], outgoing));
            self.rest.insert(insert_at, outgoing);
            self.total = total;
            swaps += 1;
        }
        swaps
    }

    /// Finds the swap moving the total closest to the bounds, if it improves.
    fn best_swap(&self, bounds: Bounds) -> Option<(usize, usize, u64)> {
        let current = bounds.distance(self.total);
        let goal = if self.total < bounds.low { bounds.low } else { bounds.high };
        let mut best: Option<(usize, usize, u64, u64)> = None;

        for (slot, outgoing) in self.chosen.iter().enumerate() {
            let base = self.total - self.bandwidths[*outgoing];
            let wanted = goal.saturating_sub(base);
            let split = self.rest.partition_point(|index| self.bandwidths[*index] < wanted);

            for position in [split.checked_sub(1), Some(split)].into_iter().flatten() {
                let Some(incoming) = self.rest.get(position) else {
                    continue;
                };
                let total = base + self.bandwidths[*incoming];
                let distance = bounds.distance(total);
                if distance < current && best.is_none_or(|(_, _, _, d)| distance < d) {
                    best = Some((slot, position, total, distance));
                }
            }
        }

        best.map(|(slot, position, total, _)| (slot, position, total))
    }
}
