//! Consensus epochs and the relay catalog.
//!
//! A catalog is an ordered list of immutable consensus snapshots. Each
//! snapshot covers a half-open time range and carries the position weights
//! that path selection multiplies into relay bandwidth.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::relay::{Flag, Relay, RelayFlags, RelayId};

/// Scale of the integer bandwidth weights published in a consensus.
pub const WEIGHT_SCALE: f64 = 10_000.0;

/// Errors from building or querying a relay catalog.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogError {
    #[error("No consensus data covers {time}")]
    DataUnavailable { time: DateTime<Utc> },

    #[error("Relay catalog contains no consensus epochs")]
    Empty,

    #[error("Invalid consensus epoch starting at {valid_after}: {reason}")]
    InvalidEpoch {
        valid_after: DateTime<Utc>,
        reason: String,
    },
}

/// Hop position within a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Guard,
    Middle,
    Exit,
}

impl Position {
    /// Flags a relay needs, beyond the configured baseline, to fill this position.
    pub fn required_flags(self) -> RelayFlags {
        match self {
            Position::Guard => RelayFlags::empty().with(Flag::Guard),
            Position::Middle => RelayFlags::empty(),
            Position::Exit => RelayFlags::empty().with(Flag::Exit),
        }
    }

    /// Checks whether `relay` may fill this position given baseline `required` flags.
    pub fn admits(self, relay: &Relay, required: RelayFlags) -> bool {
        if !relay.has_flags(required) || !relay.has_flags(self.required_flags()) {
            return false;
        }
        self != Position::Exit || !relay.flags.contains(Flag::BadExit)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Position::Guard => "guard",
            Position::Middle => "middle",
            Position::Exit => "exit",
        };
        write!(f, "{name}")
    }
}

/// Weight class of a relay, derived from its Guard and Exit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagClass {
    /// Guard only
    Guard,
    /// Exit only
    Exit,
    /// Guard and Exit
    Both,
    /// Neither
    Plain,
}

impl FlagClass {
    /// Classifies a flag set.
    pub fn of(flags: RelayFlags) -> Self {
        match (flags.contains(Flag::Guard), flags.contains(Flag::Exit)) {
            (true, true) => FlagClass::Both,
            (true, false) => FlagClass::Guard,
            (false, true) => FlagClass::Exit,
            (false, false) => FlagClass::Plain,
        }
    }

    fn index(self) -> usize {
        match self {
            FlagClass::Guard => 0,
            FlagClass::Exit => 1,
            FlagClass::Both => 2,
            FlagClass::Plain => 3,
        }
    }
}

/// Position weight multipliers per flag class.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionWeights {
    guard: [f64; 4],
    middle: [f64; 4],
    exit: [f64; 4],
}

impl Default for PositionWeights {
    fn default() -> Self {
        Self::uniform()
    }
}

impl PositionWeights {
    /// Weights of 1.0 for every position and class.
    pub fn uniform() -> Self {
        Self {
            guard: [1.0; 4],
            middle: [1.0; 4],
            exit: [1.0; 4],
        }
    }

    /// Creates weights from consensus `bandwidth-weights` entries.
    ///
    /// Keys follow the consensus naming (`Wgg`, `Wgd`, `Wmg`, `Wmm`, `Wme`,
    /// `Wmd`, `Wee`, `Wed`, plus the rarely published `Wgm`, `Wge`, `Weg`,
    /// `Wem`). Values are integers scaled by [`WEIGHT_SCALE`]; missing keys
    /// count as 1.0 and negative values as 0.
    pub fn from_bandwidth_weights(weights: &BTreeMap<String, i64>) -> Self {
        let lookup = |key: &str| {
            weights
                .get(key)
                .map(|value| (*value).max(0) as f64 / WEIGHT_SCALE)
                .unwrap_or(1.0)
        };

        // Columns follow FlagClass::index: guard, exit, both, plain.
        Self {
            guard: [lookup("Wgg"), lookup("Wge"), lookup("Wgd"), lookup("Wgm")],
            middle: [lookup("Wmg"), lookup("Wme"), lookup("Wmd"), lookup("Wmm")],
            exit: [lookup("Weg"), lookup("Wee"), lookup("Wed"), lookup("Wem")],
        }
    }

    /// Returns the multiplier for a relay with `flags` at `position`.
    pub fn weight(&self, flags: RelayFlags, position: Position) -> f64 {
        let class = FlagClass::of(flags).index();
        match position {
            Position::Guard => self.guard[class],
            Position::Middle => self.middle[class],
            Position::Exit => self.exit[class],
        }
    }
}

/// Relay population counts for one epoch, used in run logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochStats {
    pub relays: usize,
    pub guards: usize,
    pub exits: usize,
    pub total_bandwidth: u64,
    pub guard_bandwidth: u64,
    pub exit_bandwidth: u64,
}

/// Immutable consensus snapshot.
#[derive(Debug, Clone)]
pub struct ConsensusEpoch {
    valid_after: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    coverage_end: DateTime<Utc>,
    weights: PositionWeights,
    relays: Vec<Relay>,
}

impl ConsensusEpoch {
    /// Creates epoch from its validity interval, weights and relays.
    ///
    /// Relays are kept sorted by identifier so iteration order is stable.
    pub fn new(
        valid_after: DateTime<Utc>,
        valid_until: DateTime<Utc>,
        weights: PositionWeights,
        mut relays: Vec<Relay>,
    ) -> Self {
        relays.sort_by_key(|relay| relay.id);
        relays.dedup_by_key(|relay| relay.id);
        Self {
            valid_after,
            valid_until,
            coverage_end: valid_until,
            weights,
            relays,
        }
    }

    /// Start of the epoch's coverage.
    pub fn valid_after(&self) -> DateTime<Utc> {
        self.valid_after
    }

    /// End of the published validity interval.
    pub fn valid_until(&self) -> DateTime<Utc> {
        self.valid_until
    }

    /// Exclusive end of the time range this epoch answers for.
    ///
    /// This is the earlier of `valid_until` and the next epoch's `valid_after`.
    pub fn coverage_end(&self) -> DateTime<Utc> {
        self.coverage_end
    }

    /// Checks whether `time` falls inside this epoch's coverage.
    pub fn covers(&self, time: DateTime<Utc>) -> bool {
        self.valid_after <= time && time < self.coverage_end
    }

    /// Position weights of this epoch.
    pub fn weights(&self) -> &PositionWeights {
        &self.weights
    }

    /// All relays ordered by identifier.
    pub fn relays(&self) -> &[Relay] {
        &self.relays
    }

    /// Looks up a relay by identifier.
    pub fn relay(&self, id: RelayId) -> Option<&Relay> {
        self.relays
            .binary_search_by_key(&id, |relay| relay.id)
            .ok()
            .map(|index| &self.relays[index])
    }

    /// Relays carrying every flag in `flags`, ordered by identifier.
    pub fn relays_with_flags(&self, flags: RelayFlags) -> impl Iterator<Item = &Relay> {
        self.relays.iter().filter(move |relay| relay.has_flags(flags))
    }

    /// Counts relays eligible for guard and exit positions.
    pub fn stats(&self, required: RelayFlags) -> EpochStats {
        let mut stats = EpochStats {
            relays: self.relays.len(),
            ..EpochStats::default()
        };
        for relay in &self.relays {
            stats.total_bandwidth += relay.bandwidth;
            if Position::Guard.admits(relay, required) {
                stats.guards += 1;
                stats.guard_bandwidth += relay.bandwidth;
            }
            if Position::Exit.admits(relay, required) {
                stats.exits += 1;
                stats.exit_bandwidth += relay.bandwidth;
            }
        }
        stats
    }
}

/// Ordered, read-only collection of consensus epochs.
#[derive(Debug, Clone)]
pub struct RelayCatalog {
    epochs: Vec<ConsensusEpoch>,
    fingerprints: BTreeMap<RelayId, String>,
}

impl RelayCatalog {
    /// Creates catalog from epochs in any order.
    ///
    /// Epochs are sorted by `valid_after` and each epoch's coverage is
    /// clipped at the start of its successor.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Empty` - If no epoch is given
    /// - `CatalogError::InvalidEpoch` - If an epoch ends before it starts or two epochs start together
    pub fn from_epochs(mut epochs: Vec<ConsensusEpoch>) -> Result<Self, CatalogError> {
        if epochs.is_empty() {
            return Err(CatalogError::Empty);
        }
        epochs.sort_by_key(|epoch| epoch.valid_after);

        for index in 0..epochs.len() {
            let epoch = &epochs[index];
            if epoch.valid_until <= epoch.valid_after {
                return Err(CatalogError::InvalidEpoch {
                    valid_after: epoch.valid_after,
                    reason: format!("valid_until {} is not after valid_after", epoch.valid_until),
                });
            }
            let next_start = epochs.get(index + 1).map(|next| next.valid_after);
            if next_start == Some(epoch.valid_after) {
                return Err(CatalogError::InvalidEpoch {
                    valid_after: epoch.valid_after,
                    reason: "duplicate consensus for the same valid_after".to_string(),
                });
            }
            let coverage_end = next_start.map_or(epoch.valid_until, |start| start.min(epoch.valid_until));
            epochs[index].coverage_end = coverage_end;
        }

        let fingerprints = epochs
            .iter()
            .flat_map(|epoch| epoch.relays.iter())
            .map(|relay| (relay.id, relay.fingerprint.clone()))
            .collect();

        Ok(Self {
            epochs,
            fingerprints,
        })
    }

    /// Creates a catalog holding one epoch.
    ///
    /// # Errors
    ///
    /// - `CatalogError::InvalidEpoch` - If the epoch interval is empty
    pub fn single(epoch: ConsensusEpoch) -> Result<Self, CatalogError> {
        Self::from_epochs(vec![epoch])
    }

    /// Returns the epoch whose coverage contains `time`.
    ///
    /// # Errors
    ///
    /// - `CatalogError::DataUnavailable` - If no epoch covers `time`
    pub fn epoch_for(&self, time: DateTime<Utc>) -> Result<&ConsensusEpoch, CatalogError> {
        let after = self.epochs.partition_point(|epoch| epoch.valid_after <= time);
        after
            .checked_sub(1)
            .map(|index| &self.epochs[index])
            .filter(|epoch| epoch.covers(time))
            .ok_or(CatalogError::DataUnavailable { time })
    }

    /// Relays of `epoch` carrying every flag in `flags`.
    pub fn relays_with_flags<'a>(
        &self,
        epoch: &'a ConsensusEpoch,
        flags: RelayFlags,
    ) -> Vec<&'a Relay> {
        epoch.relays_with_flags(flags).collect()
    }

    /// Verifies that every instant of `[from, to)` is covered by some epoch.
    ///
    /// # Errors
    ///
    /// - `CatalogError::DataUnavailable` - With the first uncovered instant
    pub fn ensure_covers(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), CatalogError> {
        let mut cursor = from;
        while cursor < to {
            cursor = self.epoch_for(cursor)?.coverage_end;
        }
        Ok(())
    }

    /// Epochs overlapping `[from, to)` in time order.
    pub fn epochs_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Iterator<Item = &ConsensusEpoch> {
        self.epochs
            .iter()
            .filter(move |epoch| epoch.valid_after < to && from < epoch.coverage_end)
    }

    /// All epochs in time order.
    pub fn epochs(&self) -> &[ConsensusEpoch] {
        &self.epochs
    }

    /// Overall time range with data, ignoring gaps.
    pub fn coverage(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.epochs.first().map(|epoch| epoch.valid_after);
        let end = self.epochs.last().map(|epoch| epoch.coverage_end);
        match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Fingerprint of a relay seen in any epoch.
    pub fn fingerprint(&self, id: RelayId) -> Option<&str> {
        self.fingerprints.get(&id).map(String::as_str)
    }

    /// Number of distinct relays across all epochs.
    pub fn distinct_relays(&self) -> usize {
        self.fingerprints.len()
    }
}

#[cfg(test)]
mod tests;
