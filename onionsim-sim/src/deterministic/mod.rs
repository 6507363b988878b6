//! Deterministic simulation building blocks.
//!
//! Seeded sub-stream randomness, the simulation clock, trace events with
//! their total order, run invariants and metrics. Together they make a run
//! a pure function of its seed and inputs.

mod clock;
mod events;
mod invariants;
mod state;

// Re-export core types for public API
pub use clock::{DeterministicRng, Draw, RUN_SCOPE, SimClock};
pub use events::{CIRCUIT_INDEX_BITS, EventKind, TraceEvent, TraceRecord, circuit_id};
pub use invariants::{
    CircuitDisjointnessInvariant, ExitPolicyInvariant, Invariant, InvariantViolation,
    MonotoneCircuitInvariant, WindowInvariant, standard_invariants,
};
pub use state::{ClientMetrics, RunReport};

#[cfg(test)]
mod tests;
