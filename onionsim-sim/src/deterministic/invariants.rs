//! Invariant checking framework for simulated client outcomes.

use std::collections::HashMap;
use std::fmt;

use onionsim_core::catalog::RelayCatalog;
use onionsim_core::relay::{Relay, RelayId};

use super::clock::SimClock;
use super::events::EventKind;
use crate::client::{Circuit, ClientOutcome};

/// Violation of a run invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: String,
    /// Detailed description of the violation
    pub description: String,
    /// Client whose outcome violates it
    pub client_id: u32,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invariant '{}' violated by client {}: {}",
            self.invariant, self.client_id, self.description
        )
    }
}

impl std::error::Error for InvariantViolation {}

/// Trait for checking run invariants.
pub trait Invariant: Send + Sync {
    /// Checks if invariant holds for a client's outcome.
    ///
    /// # Errors
    ///
    /// - `InvariantViolation` - If the outcome breaks the invariant
    fn check(&self, outcome: &ClientOutcome) -> Result<(), InvariantViolation>;

    /// Returns name of this invariant.
    fn name(&self) -> &str;

    /// Builds a violation of this invariant.
    fn violation(&self, outcome: &ClientOutcome, description: String) -> InvariantViolation {
        InvariantViolation {
            invariant: self.name().to_string(),
            description,
            client_id: outcome.client_id,
        }
    }
}

/// Returns the standard invariants for a run over `catalog` and `clock`.
pub fn standard_invariants(catalog: &RelayCatalog, clock: SimClock) -> Vec<Box<dyn Invariant + '_>> {
    vec![
        Box::new(CircuitDisjointnessInvariant::new(catalog)),
        Box::new(ExitPolicyInvariant::new(catalog)),
        Box::new(MonotoneCircuitInvariant),
        Box::new(WindowInvariant::new(clock)),
    ]
}

fn hop<'c>(catalog: &'c RelayCatalog, circuit: &Circuit, id: RelayId) -> Option<&'c Relay> {
    catalog.epoch_for(circuit.created_at).ok()?.relay(id)
}

/// Ensures circuit hops are distinct and unrelated at the circuit's exclusion level.
pub struct CircuitDisjointnessInvariant<'c> {
    catalog: &'c RelayCatalog,
}

impl<'c> CircuitDisjointnessInvariant<'c> {
    /// Creates invariant resolving hops in `catalog`.
    pub fn new(catalog: &'c RelayCatalog) -> Self {
        Self { catalog }
    }
}

impl Invariant for CircuitDisjointnessInvariant<'_> {
    fn check(&self, outcome: &ClientOutcome) -> Result<(), InvariantViolation> {
        for circuit in &outcome.circuits {
            let mut ids = vec![circuit.guard, circuit.exit];
            ids.extend(circuit.middle);

            let mut hops = Vec::with_capacity(ids.len());
            for id in ids {
                let relay = hop(self.catalog, circuit, id).ok_or_else(|| {
                    self.violation(
                        outcome,
                        format!("circuit {} uses relay {id} absent from its epoch", circuit.id),
                    )
                })?;
                hops.push(relay);
            }

            for (index, first) in hops.iter().enumerate() {
                for second in &hops[index + 1..] {
                    if !circuit.level.permits_pair(first, second) {
                        return Err(self.violation(
                            outcome,
                            format!(
                                "circuit {} pairs relays {} and {} at level {}",
                                circuit.id, first.id, second.id, circuit.level
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "CircuitDisjointness"
    }
}

/// Ensures every stream's port is allowed by its circuit's exit.
pub struct ExitPolicyInvariant<'c> {
    catalog: &'c RelayCatalog,
}

impl<'c> ExitPolicyInvariant<'c> {
    /// Creates invariant resolving exits in `catalog`.
    pub fn new(catalog: &'c RelayCatalog) -> Self {
        Self { catalog }
    }
}

impl Invariant for ExitPolicyInvariant<'_> {
    fn check(&self, outcome: &ClientOutcome) -> Result<(), InvariantViolation> {
        let circuits: HashMap<u64, &Circuit> = outcome
            .circuits
            .iter()
            .map(|circuit| (circuit.id, circuit))
            .collect();

        for stream in &outcome.streams {
            let allowed = circuits
                .get(&stream.circuit_id)
                .and_then(|circuit| hop(self.catalog, circuit, circuit.exit))
                .is_some_and(|exit| exit.allows_port(stream.port));
            if !allowed {
                return Err(self.violation(
                    outcome,
                    format!(
                        "stream {} to port {} rides circuit {} whose exit rejects it",
                        stream.index, stream.port, stream.circuit_id
                    ),
                ));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ExitPolicy"
    }
}

/// Ensures each circuit's events open with creation, close last and never go back in time.
pub struct MonotoneCircuitInvariant;

impl Invariant for MonotoneCircuitInvariant {
    fn check(&self, outcome: &ClientOutcome) -> Result<(), InvariantViolation> {
        let mut last: HashMap<u64, (i64, EventKind)> = HashMap::new();

        for event in &outcome.events {
            let record = &event.record;
            match last.get(&record.circuit_id) {
                None if record.kind != EventKind::CircuitCreated => {
                    return Err(self.violation(
                        outcome,
                        format!("circuit {} starts with {}", record.circuit_id, record.kind),
                    ));
                }
                Some((_, EventKind::CircuitClosed)) => {
                    return Err(self.violation(
                        outcome,
                        format!("circuit {} has {} after closing", record.circuit_id, record.kind),
                    ));
                }
                Some((timestamp, _)) if *timestamp > record.timestamp_ms => {
                    return Err(self.violation(
                        outcome,
                        format!(
                            "circuit {} goes back from {timestamp} to {}",
                            record.circuit_id, record.timestamp_ms
                        ),
                    ));
                }
                _ => {}
            }
            last.insert(record.circuit_id, (record.timestamp_ms, record.kind));
        }

        if let Some((circuit, _)) = last.iter().find(|(_, (_, kind))| *kind != EventKind::CircuitClosed) {
            return Err(self.violation(outcome, format!("circuit {circuit} never closes")));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MonotoneCircuit"
    }
}

/// Ensures all events lie within the simulated window.
pub struct WindowInvariant {
    clock: SimClock,
}

impl WindowInvariant {
    /// Creates invariant for the clock's window.
    pub fn new(clock: SimClock) -> Self {
        Self { clock }
    }
}

impl Invariant for WindowInvariant {
    fn check(&self, outcome: &ClientOutcome) -> Result<(), InvariantViolation> {
        let range = self.clock.start_millis()..self.clock.end_millis();
        match outcome
            .events
            .iter()
            .find(|event| !range.contains(&event.record.timestamp_ms))
        {
            Some(event) => Err(self.violation(
                outcome,
                format!(
                    "{} at {} outside [{}, {})",
                    event.record.kind, event.record.timestamp_ms, range.start, range.end
                ),
            )),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "Window"
    }
}
