//! Bandwidth-weighted relay selection for circuit positions.

use rand::Rng;
use tracing::trace;

use super::exclusion::{ExclusionLevel, ExclusionSet};
use super::weighted::choose_weighted;
use crate::catalog::{ConsensusEpoch, Position};
use crate::config::PathConfig;
use crate::relay::{Relay, RelayId};

/// Errors from relay selection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("No eligible {position} relay after {attempts} attempt(s)")]
    NoEligibleRelay { position: Position, attempts: usize },
}

/// Relays chosen for one circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitPath {
    pub guard: RelayId,
    pub middle: Option<RelayId>,
    pub exit: RelayId,
    /// Exclusion level the path satisfies
    pub level: ExclusionLevel,
    /// Attempts used, starting at one
    pub attempts: usize,
}

/// Weighted path selection over a consensus epoch.
///
/// A relay's weight at a position is its bandwidth multiplied by the epoch's
/// position weight for its flag class. Draws are proportional to weight
/// among relays that are eligible for the position and not excluded by the
/// hops already on the circuit.
#[derive(Debug, Clone, Default)]
pub struct PathSelector {
    config: PathConfig,
}

impl PathSelector {
    /// Creates selector with the given path parameters.
    pub fn new(config: PathConfig) -> Self {
        Self { config }
    }

    /// Path parameters in use.
    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    /// Eligible relays for `position` with their selection weights.
    ///
    /// `port` restricts exits to those whose policy allows it; `None`
    /// accepts any exit that allows at least one port.
    pub fn candidates<'e>(
        &self,
        epoch: &'e ConsensusEpoch,
        position: Position,
        port: Option<u16>,
        exclusion: &ExclusionSet<'_>,
    ) -> Vec<(&'e Relay, f64)> {
        epoch
            .relays()
            .iter()
            .filter(|relay| position.admits(relay, self.config.required_flags))
            .filter(|relay| position != Position::Exit || exit_allows(relay, port))
            .filter(|relay| !exclusion.excludes(relay))
            .map(|relay| {
                let weight = relay.bandwidth as f64 * epoch.weights().weight(relay.flags, position);
                (relay, weight)
            })
            .collect()
    }

    /// Exact selection probability of every candidate.
    ///
    /// Probabilities are uniform when all candidate weights are zero.
    pub fn probabilities(
        &self,
        epoch: &ConsensusEpoch,
        position: Position,
        port: Option<u16>,
        exclusion: &ExclusionSet<'_>,
    ) -> Vec<(RelayId, f64)> {
        let candidates = self.candidates(epoch, position, port, exclusion);
        let total: f64 = candidates.iter().map(|(_, weight)| weight.max(0.0)).sum();
        let count = candidates.len() as f64;

        candidates
            .into_iter()
            .map(|(relay, weight)| {
                let probability = if total > 0.0 {
                    weight.max(0.0) / total
                } else {
                    1.0 / count
                };
                (relay.id, probability)
            })
            .collect()
    }

    /// Draws one relay for `position`.
    ///
    /// # Errors
    ///
    /// - `SelectionError::NoEligibleRelay` - If no candidate survives filtering
    pub fn select<'e, R: Rng + ?Sized>(
        &self,
        epoch: &'e ConsensusEpoch,
        position: Position,
        port: Option<u16>,
        exclusion: &ExclusionSet<'_>,
        rng: &mut R,
    ) -> Result<&'e Relay, SelectionError> {
        let candidates = self.candidates(epoch, position, port, exclusion);
        let weights: Vec<f64> = candidates.iter().map(|(_, weight)| *weight).collect();

        choose_weighted(&weights, rng)
            .map(|index| candidates[index].0)
            .ok_or(SelectionError::NoEligibleRelay {
                position,
                attempts: 1,
            })
    }

    /// Draws a guard.
    ///
    /// # Errors
    ///
    /// - `SelectionError::NoEligibleRelay` - If the epoch has no eligible guard
    pub fn select_guard<'e, R: Rng + ?Sized>(
        &self,
        epoch: &'e ConsensusEpoch,
        rng: &mut R,
    ) -> Result<&'e Relay, SelectionError> {
        let exclusion = ExclusionSet::new(ExclusionLevel::Strict);
        self.select(epoch, Position::Guard, None, &exclusion, rng)
    }

    /// Draws an exit allowing `port` that does not conflict with `exclusion`.
    ///
    /// # Errors
    ///
    /// - `SelectionError::NoEligibleRelay` - If no exit qualifies
    pub fn select_exit<'e, R: Rng + ?Sized>(
        &self,
        epoch: &'e ConsensusEpoch,
        port: Option<u16>,
        exclusion: &ExclusionSet<'_>,
        rng: &mut R,
    ) -> Result<&'e Relay, SelectionError> {
        self.select(epoch, Position::Exit, port, exclusion, rng)
    }

    /// Draws a middle relay that does not conflict with `exclusion`.
    ///
    /// # Errors
    ///
    /// - `SelectionError::NoEligibleRelay` - If no middle qualifies
    pub fn select_middle<'e, R: Rng + ?Sized>(
        &self,
        epoch: &'e ConsensusEpoch,
        exclusion: &ExclusionSet<'_>,
        rng: &mut R,
    ) -> Result<&'e Relay, SelectionError> {
        self.select(epoch, Position::Middle, None, exclusion, rng)
    }

    /// Selects exit and middle hops for a circuit behind `guard`.
    ///
    /// Runs up to `max_attempts` attempts. With relaxation enabled each
    /// retry drops subnet and then family exclusion; `guard != exit` holds
    /// at every level.
    ///
    /// # Errors
    ///
    /// - `SelectionError::NoEligibleRelay` - Naming the position that failed last
    pub fn build_circuit<'e, R: Rng + ?Sized>(
        &self,
        epoch: &'e ConsensusEpoch,
        guard: &'e Relay,
        port: u16,
        rng: &mut R,
    ) -> Result<CircuitPath, SelectionError> {
        let attempts = self.config.max_attempts.max(1);
        let mut failed = Position::Exit;

        for attempt in 0..attempts {
            let level = ExclusionLevel::for_attempt(attempt, self.config.relax_exclusions);
            let mut exclusion = ExclusionSet::with_relay(level, guard);

            let exit = match self.select_exit(epoch, Some(port), &exclusion, rng) {
                Ok(exit) => exit,
                Err(_) => {
                    trace!(attempt, %level, port, "No exit candidate");
                    failed = Position::Exit;
                    continue;
                }
            };
            exclusion.insert(exit);

            let middle = if self.config.middle_hop {
                match self.select_middle(epoch, &exclusion, rng) {
                    Ok(middle) => Some(middle.id),
                    Err(_) => {
                        trace!(attempt, %level, "No middle candidate");
                        failed = Position::Middle;
                        continue;
                    }
                }
            } else {
                None
            };

            return Ok(CircuitPath {
                guard: guard.id,
                middle,
                exit: exit.id,
                level,
                attempts: attempt + 1,
            });
        }

        Err(SelectionError::NoEligibleRelay {
            position: failed,
            attempts,
        })
    }
}

fn exit_allows(relay: &Relay, port: Option<u16>) -> bool {
    match port {
        Some(port) => relay.allows_port(port),
        None => relay.exit_policy.allows_any(),
    }
}
