//! Guard persistence and rotation.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use super::selector::{PathSelector, SelectionError};
use crate::catalog::{ConsensusEpoch, Position};
use crate::config::PathConfig;
use crate::relay::{Relay, RelayId};

/// Why a client's guard must be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// Guard lifetime elapsed
    Expired,
    /// Guard is not listed in the current epoch
    Missing,
    /// Guard is listed but no longer guard-eligible
    Ineligible,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RotationReason::Expired => "expired",
            RotationReason::Missing => "missing",
            RotationReason::Ineligible => "ineligible",
        };
        f.write_str(reason)
    }
}

/// A client's current entry guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardAssignment {
    guard: RelayId,
    assigned_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl GuardAssignment {
    /// Draws a guard from `epoch` and samples its lifetime.
    ///
    /// # Errors
    ///
    /// - `SelectionError::NoEligibleRelay` - If the epoch has no eligible guard
    pub fn assign<R: Rng + ?Sized>(
        selector: &PathSelector,
        epoch: &ConsensusEpoch,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Self, SelectionError> {
        let guard = selector.select_guard(epoch, rng)?;
        let lifetime = sample_lifetime(selector.config(), rng);
        Ok(Self {
            guard: guard.id,
            assigned_at: now,
            expires_at: now + lifetime,
        })
    }

    /// Guard relay identifier.
    pub fn guard(&self) -> RelayId {
        self.guard
    }

    /// When the guard was chosen.
    pub fn assigned_at(&self) -> DateTime<Utc> {
        self.assigned_at
    }

    /// When the guard lifetime ends.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Looks the guard up in `epoch`.
    pub fn resolve<'e>(&self, epoch: &'e ConsensusEpoch) -> Option<&'e Relay> {
        epoch.relay(self.guard)
    }

    /// Returns why the guard cannot be used at `now`, if it cannot.
    pub fn rotation_reason(
        &self,
        epoch: &ConsensusEpoch,
        now: DateTime<Utc>,
        config: &PathConfig,
    ) -> Option<RotationReason> {
        if now >= self.expires_at {
            return Some(RotationReason::Expired);
        }
        match self.resolve(epoch) {
            None => Some(RotationReason::Missing),
            Some(relay) if !Position::Guard.admits(relay, config.required_flags) => {
                Some(RotationReason::Ineligible)
            }
            Some(_) => None,
        }
    }
}

/// Samples a lifetime uniformly from the configured range.
pub fn sample_lifetime<R: Rng + ?Sized>(config: &PathConfig, rng: &mut R) -> Duration {
    let min = config.guard_lifetime_min.num_milliseconds();
    let max = config.guard_lifetime_max.num_milliseconds();
    if max <= min {
        return config.guard_lifetime_min;
    }
    Duration::milliseconds(rng.random_range(min..=max))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::catalog::PositionWeights;
    use crate::relay::{Flag, RelayFlags};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn epoch(relays: Vec<Relay>) -> ConsensusEpoch {
        ConsensusEpoch::new(
            start(),
            start() + Duration::days(90),
            PositionWeights::uniform(),
            relays,
        )
    }

    fn guard(raw: u32) -> Relay {
        let flags = RelayFlags::from_flags(&[Flag::Guard, Flag::Valid, Flag::Running]);
        Relay::new(RelayId::new(raw), 100, flags)
    }

    #[test]
    fn test_lifetime_within_configured_range() {
        let config = PathConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            let lifetime = sample_lifetime(&config, &mut rng);
            assert!(lifetime >= Duration::days(30));
            assert!(lifetime <= Duration::days(60));
        }
    }

    #[test]
    fn test_guard_persists_until_expiry() {
        let epoch = epoch(vec![guard(1), guard(2)]);
        let selector = PathSelector::default();
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let assignment = GuardAssignment::assign(&selector, &epoch, start(), &mut rng).unwrap();
        let config = selector.config();

        assert_eq!(assignment.rotation_reason(&epoch, start() + Duration::days(29), config), None);
        assert_eq!(
            assignment.rotation_reason(&epoch, assignment.expires_at(), config),
            Some(RotationReason::Expired)
        );
    }

    #[test]
    fn test_guard_rotates_when_missing_or_ineligible() {
        let selector = PathSelector::default();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let first = epoch(vec![guard(1)]);
        let assignment = GuardAssignment::assign(&selector, &first, start(), &mut rng).unwrap();
        assert_eq!(assignment.guard(), RelayId::new(1));

        let without = epoch(vec![guard(2)]);
        assert_eq!(
            assignment.rotation_reason(&without, start(), selector.config()),
            Some(RotationReason::Missing)
        );

        let demoted = epoch(vec![Relay::new(
            RelayId::new(1),
            100,
            RelayFlags::from_flags(&[Flag::Valid, Flag::Running]),
        )]);
        assert_eq!(
            assignment.rotation_reason(&demoted, start(), selector.config()),
            Some(RotationReason::Ineligible)
        );
    }

    #[test]
    fn test_assign_fails_without_guards() {
        let selector = PathSelector::default();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let epoch = epoch(vec![]);
        assert!(matches!(
            GuardAssignment::assign(&selector, &epoch, start(), &mut rng),
            Err(SelectionError::NoEligibleRelay {
                position: Position::Guard,
                ..
            })
        ));
    }
}
