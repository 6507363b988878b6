//! Per-circuit exclusion of related relays.

use std::fmt;

use crate::relay::Relay;

/// How strictly relays related to already-chosen hops are excluded.
///
/// Identity exclusion holds at every level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExclusionLevel {
    /// Identity, family and subnet exclusion
    Strict,
    /// Identity and family exclusion
    SubnetRelaxed,
    /// Identity exclusion only
    FamilyRelaxed,
}

impl ExclusionLevel {
    /// Level used for the zero-based selection `attempt`.
    ///
    /// Without relaxation every attempt is strict; otherwise each retry
    /// drops one more constraint until only identity exclusion remains.
    pub fn for_attempt(attempt: usize, relax: bool) -> Self {
        if !relax {
            return ExclusionLevel::Strict;
        }
        match attempt {
            0 => ExclusionLevel::Strict,
            1 => ExclusionLevel::SubnetRelaxed,
            _ => ExclusionLevel::FamilyRelaxed,
        }
    }

    /// Checks whether subnet sharing excludes a candidate.
    pub fn excludes_subnet(self) -> bool {
        self == ExclusionLevel::Strict
    }

    /// Checks whether family membership excludes a candidate.
    pub fn excludes_family(self) -> bool {
        self != ExclusionLevel::FamilyRelaxed
    }

    /// Checks whether `a` and `b` may share a circuit at this level.
    pub fn permits_pair(self, a: &Relay, b: &Relay) -> bool {
        if a.id == b.id {
            return false;
        }
        if self.excludes_family() && a.is_family_of(b) {
            return false;
        }
        !(self.excludes_subnet() && a.shares_subnet_with(b))
    }

    /// Returns stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ExclusionLevel::Strict => "strict",
            ExclusionLevel::SubnetRelaxed => "subnet_relaxed",
            ExclusionLevel::FamilyRelaxed => "family_relaxed",
        }
    }
}

impl fmt::Display for ExclusionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relays already placed on the circuit under construction.
#[derive(Debug, Clone)]
pub struct ExclusionSet<'a> {
    chosen: Vec<&'a Relay>,
    level: ExclusionLevel,
}

impl<'a> ExclusionSet<'a> {
    /// Creates empty set at `level`.
    pub fn new(level: ExclusionLevel) -> Self {
        Self {
            chosen: Vec::with_capacity(3),
            level,
        }
    }

    /// Creates set already holding `relay`.
    pub fn with_relay(level: ExclusionLevel, relay: &'a Relay) -> Self {
        let mut set = Self::new(level);
        set.insert(relay);
        set
    }

    /// Adds a chosen hop.
    pub fn insert(&mut self, relay: &'a Relay) {
        self.chosen.push(relay);
    }

    /// Exclusion level in force.
    pub fn level(&self) -> ExclusionLevel {
        self.level
    }

    /// Checks whether `candidate` conflicts with any chosen hop.
    pub fn excludes(&self, candidate: &Relay) -> bool {
        self.chosen
            .iter()
            .any(|chosen| !self.level.permits_pair(chosen, candidate))
    }

    /// Number of chosen hops.
    pub fn len(&self) -> usize {
        self.chosen.len()
    }

    /// Checks whether no hop is chosen yet.
    pub fn is_empty(&self) -> bool {
        self.chosen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use proptest::prelude::*;

    use super::*;
    use crate::relay::{RelayFlags, RelayId};

    fn relay(raw: u32) -> Relay {
        Relay::new(RelayId::new(raw), 100, RelayFlags::empty())
    }

    fn in_subnet(raw: u32, a: u8, b: u8) -> Relay {
        relay(raw).with_address(IpAddr::V4(Ipv4Addr::new(a, b, raw as u8, 1)))
    }

    #[test]
    fn test_ladder() {
        assert_eq!(ExclusionLevel::for_attempt(0, true), ExclusionLevel::Strict);
        assert_eq!(ExclusionLevel::for_attempt(1, true), ExclusionLevel::SubnetRelaxed);
        assert_eq!(ExclusionLevel::for_attempt(5, true), ExclusionLevel::FamilyRelaxed);
        assert_eq!(ExclusionLevel::for_attempt(5, false), ExclusionLevel::Strict);
    }

    #[test]
    fn test_strict_excludes_identity_family_and_subnet() {
        let guard = in_subnet(1, 192, 0).with_family([RelayId::new(2)]);
        let set = ExclusionSet::with_relay(ExclusionLevel::Strict, &guard);

        assert!(set.excludes(&guard));
        assert!(set.excludes(&in_subnet(2, 172, 16)));
        assert!(set.excludes(&in_subnet(3, 192, 0)));
        assert!(!set.excludes(&in_subnet(4, 192, 1)));
    }

    #[test]
    fn test_relaxed_levels_keep_identity_exclusion() {
        let guard = in_subnet(1, 192, 0).with_family([RelayId::new(2)]);
        let sibling = in_subnet(2, 192, 0);
        let neighbour = in_subnet(3, 192, 0);

        let subnet_relaxed = ExclusionSet::with_relay(ExclusionLevel::SubnetRelaxed, &guard);
        assert!(subnet_relaxed.excludes(&guard));
        assert!(subnet_relaxed.excludes(&sibling));
        assert!(!subnet_relaxed.excludes(&neighbour));

        let family_relaxed = ExclusionSet::with_relay(ExclusionLevel::FamilyRelaxed, &guard);
        assert!(family_relaxed.excludes(&guard));
        assert!(!family_relaxed.excludes(&sibling));
    }

    proptest! {
        #[test]
        fn prop_exclusion_is_symmetric(
            a_octets in (0u8..4, 0u8..4),
            b_octets in (0u8..4, 0u8..4),
            a_lists_b in any::<bool>(),
            b_lists_a in any::<bool>(),
            level in 0usize..3,
        ) {
            let mut a = in_subnet(1, a_octets.0, a_octets.1);
            let mut b = in_subnet(2, b_octets.0, b_octets.1);
            if a_lists_b {
                a = a.with_family([RelayId::new(2)]);
            }
            if b_lists_a {
                b = b.with_family([RelayId::new(1)]);
            }
            let level = ExclusionLevel::for_attempt(level, true);

            prop_assert_eq!(level.permits_pair(&a, &b), level.permits_pair(&b, &a));
            prop_assert!(!level.permits_pair(&a, &a));
            if level == ExclusionLevel::Strict && level.permits_pair(&a, &b) {
                prop_assert!(!a.is_family_of(&b));
                prop_assert!(!a.shares_subnet_with(&b));
            }
        }
    }
}
