//! Tor-style path selection.
//!
//! Guards are drawn once per client and kept until they expire or leave the
//! consensus. Exit and middle hops are drawn per circuit, proportionally to
//! position-weighted bandwidth, excluding relays related to hops already on
//! the circuit.

mod exclusion;
mod guard;
mod selector;
mod weighted;

pub use exclusion::{ExclusionLevel, ExclusionSet};
pub use guard::{GuardAssignment, RotationReason, sample_lifetime};
pub use selector::{CircuitPath, PathSelector, SelectionError};
pub use weighted::{choose_weighted, weighted_order};
