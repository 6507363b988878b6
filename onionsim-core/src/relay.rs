//! Relay records as published in a consensus snapshot.
//!
//! Relays are immutable within an epoch. Identity, capability flags, family
//! declarations, network prefix and exit policy are everything path selection
//! needs to know about a relay.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::policy::ExitPolicy;

/// Compact numeric relay identifier.
///
/// Assigned by the catalog from fingerprints so that identifiers are stable
/// across epochs and small enough to print in every trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelayId(u32);

impl RelayId {
    /// Creates relay identifier from raw value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns raw numeric value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability flag assigned by the directory authorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Guard,
    Exit,
    Fast,
    Stable,
    Valid,
    Running,
    BadExit,
}

impl Flag {
    const ALL: [Flag; 7] = [
        Flag::Guard,
        Flag::Exit,
        Flag::Fast,
        Flag::Stable,
        Flag::Valid,
        Flag::Running,
        Flag::BadExit,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Returns consensus spelling of the flag.
    pub fn as_str(self) -> &'static str {
        match self {
            Flag::Guard => "Guard",
            Flag::Exit => "Exit",
            Flag::Fast => "Fast",
            Flag::Stable => "Stable",
            Flag::Valid => "Valid",
            Flag::Running => "Running",
            Flag::BadExit => "BadExit",
        }
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flag::ALL
            .iter()
            .copied()
            .find(|flag| flag.as_str() == s)
            .ok_or_else(|| format!("Unknown relay flag: {s}"))
    }
}

/// Set of relay flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RelayFlags(u16);

impl RelayFlags {
    /// Creates empty flag set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates flag set from a list of flags.
    pub fn from_flags(flags: &[Flag]) -> Self {
        flags.iter().fold(Self::empty(), |set, flag| set.with(*flag))
    }

    /// Returns copy of this set with `flag` added.
    pub fn with(self, flag: Flag) -> Self {
        Self(self.0 | flag.bit())
    }

    /// Checks whether `flag` is present.
    pub fn contains(self, flag: Flag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Checks whether every flag of `other` is present.
    pub fn contains_all(self, other: RelayFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Checks whether no flag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates flags in declaration order.
    pub fn iter(self) -> impl Iterator<Item = Flag> {
        Flag::ALL.into_iter().filter(move |flag| self.contains(*flag))
    }
}

impl fmt::Display for RelayFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Flag::as_str).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// Network prefix used to keep relays of one operator apart.
///
/// IPv4 relays are grouped by /16 and IPv6 relays by /32, like Tor does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subnet {
    V4([u8; 2]),
    V6([u16; 2]),
}

impl From<IpAddr> for Subnet {
    fn from(address: IpAddr) -> Self {
        match address {
            IpAddr::V4(v4) => {
                let octets = v4.octets();
                Subnet::V4([octets[0], octets[1]])
            }
            IpAddr::V6(v6) => {
                let segments = v6.segments();
                Subnet::V6([segments[0], segments[1]])
            }
        }
    }
}

/// A relay of the anonymity network.
#[derive(Debug, Clone, PartialEq)]
pub struct Relay {
    /// Catalog-assigned identifier
    pub id: RelayId,
    /// Hex-encoded identity fingerprint
    pub fingerprint: String,
    /// Operator-chosen nickname
    pub nickname: String,
    /// Primary OR address
    pub address: IpAddr,
    /// Consensus weight
    pub bandwidth: u64,
    /// Capability flags
    pub flags: RelayFlags,
    /// Relays this relay declares as family members
    pub family: BTreeSet<RelayId>,
    /// Ports this relay allows exiting to
    pub exit_policy: ExitPolicy,
}

impl Relay {
    /// Creates relay with synthetic identity data derived from `id`.
    ///
    /// Every synthetic relay gets its own /16 so that tests only share
    /// subnets when they ask for it through [`Relay::with_address`].
    pub fn new(id: RelayId, bandwidth: u64, flags: RelayFlags) -> Self {
        let raw = id.as_u32();
        let address = Ipv4Addr::new(10u8.wrapping_add((raw >> 8) as u8), raw as u8, 0, 1);
        let exit_policy = if flags.contains(Flag::Exit) {
            ExitPolicy::accept_all()
        } else {
            ExitPolicy::reject_all()
        };

        Self {
            id,
            fingerprint: format!("{raw:040X}"),
            nickname: format!("relay{raw}"),
            address: IpAddr::V4(address),
            bandwidth,
            flags,
            family: BTreeSet::new(),
            exit_policy,
        }
    }

    /// Replaces the relay address.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Replaces the declared family.
    pub fn with_family(mut self, family: impl IntoIterator<Item = RelayId>) -> Self {
        self.family = family.into_iter().collect();
        self
    }

    /// Replaces the exit policy.
    pub fn with_exit_policy(mut self, exit_policy: ExitPolicy) -> Self {
        self.exit_policy = exit_policy;
        self
    }

    /// Returns the network prefix of this relay.
    pub fn subnet(&self) -> Subnet {
        Subnet::from(self.address)
    }

    /// Checks whether the relay carries all `flags`.
    pub fn has_flags(&self, flags: RelayFlags) -> bool {
        self.flags.contains_all(flags)
    }

    /// Checks whether either relay declares the other as family.
    pub fn is_family_of(&self, other: &Relay) -> bool {
        self.family.contains(&other.id) || other.family.contains(&self.id)
    }

    /// Checks whether both relays live in the same network prefix.
    pub fn shares_subnet_with(&self, other: &Relay) -> bool {
        self.subnet() == other.subnet()
    }

    /// Checks whether the exit policy allows connecting to `port`.
    pub fn allows_port(&self, port: u16) -> bool {
        self.exit_policy.allows(port)
    }
}
