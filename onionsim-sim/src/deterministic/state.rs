//! Per-client metrics and the run report.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use onionsim_core::adversary::{AdversaryFootprint, ObservationRecord};
use onionsim_core::time::TimeWindow;

use super::events::EventKind;
use crate::client::ClientOutcome;

/// Counters collected while simulating one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientMetrics {
    pub circuits_built: u64,
    pub circuits_failed: u64,
    /// Circuits built below the strict exclusion level
    pub circuits_relaxed: u64,
    /// Streams attached to an already open circuit
    pub circuits_reused: u64,
    pub streams: u64,
    /// Streams without a circuit after selection failed
    pub streams_dropped: u64,
    /// Packets before coalescing
    pub packets: u64,
    pub bytes: u64,
    pub guard_rotations: u64,
    pub correlatable_circuits: u64,
    pub guard_only_circuits: u64,
    pub exit_only_circuits: u64,
}

impl ClientMetrics {
    /// Counts a built circuit and its observability.
    pub fn record_circuit(&mut self, observation: ObservationRecord, relaxed: bool) {
        self.circuits_built += 1;
        if relaxed {
            self.circuits_relaxed += 1;
        }
        match (observation.guard_compromised, observation.exit_compromised) {
            (true, true) => self.correlatable_circuits += 1,
            (true, false) => self.guard_only_circuits += 1,
            (false, true) => self.exit_only_circuits += 1,
            (false, false) => {}
        }
    }

    /// Adds every counter of `other`.
    pub fn absorb(&mut self, other: &ClientMetrics) {
        self.circuits_built += other.circuits_built;
        self.circuits_failed += other.circuits_failed;
        self.circuits_relaxed += other.circuits_relaxed;
        self.circuits_reused += other.circuits_reused;
        self.streams += other.streams;
        self.streams_dropped += other.streams_dropped;
        self.packets += other.packets;
        self.bytes += other.bytes;
        self.guard_rotations += other.guard_rotations;
        self.correlatable_circuits += other.correlatable_circuits;
        self.guard_only_circuits += other.guard_only_circuits;
        self.exit_only_circuits += other.exit_only_circuits;
    }

    /// Share of failed circuit builds among attempted builds.
    pub fn failure_rate(&self) -> f64 {
        let attempts = self.circuits_built + self.circuits_failed;
        if attempts == 0 {
            return 0.0;
        }
        self.circuits_failed as f64 / attempts as f64
    }
}

/// Outcome of a complete run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Seed used for reproduction
    pub seed: u64,
    pub window: TimeWindow,
    pub clients: usize,
    /// Clients with at least one correlatable circuit
    pub clients_exposed: usize,
    /// Clients that hit the per-client event cap
    pub truncated_clients: usize,
    pub totals: ClientMetrics,
    pub events: u64,
    pub events_by_type: BTreeMap<EventKind, u64>,
    pub adversary_guards: usize,
    pub adversary_guard_bandwidth: u64,
    pub adversary_exits: usize,
    pub adversary_exit_bandwidth: u64,
}

impl RunReport {
    /// Creates empty report for a run against `footprint`.
    pub fn new(seed: u64, window: TimeWindow, footprint: &AdversaryFootprint) -> Self {
        Self {
            seed,
            window,
            clients: 0,
            clients_exposed: 0,
            truncated_clients: 0,
            totals: ClientMetrics::default(),
            events: 0,
            events_by_type: BTreeMap::new(),
            adversary_guards: footprint.guards().len(),
            adversary_guard_bandwidth: footprint.guard_bandwidth(),
            adversary_exits: footprint.exits().len(),
            adversary_exit_bandwidth: footprint.exit_bandwidth(),
        }
    }

    /// Adds one client's outcome.
    pub fn record(&mut self, outcome: &ClientOutcome) {
        self.clients += 1;
        if outcome.metrics.correlatable_circuits > 0 {
            self.clients_exposed += 1;
        }
        if outcome.truncated {
            self.truncated_clients += 1;
        }
        self.totals.absorb(&outcome.metrics);
        for event in &outcome.events {
            self.events += 1;
            *self.events_by_type.entry(event.record.kind).or_insert(0) += 1;
        }
    }

    /// Share of built circuits that are fully correlatable.
    pub fn correlatable_share(&self) -> f64 {
        if self.totals.circuits_built == 0 {
            return 0.0;
        }
        self.totals.correlatable_circuits as f64 / self.totals.circuits_built as f64
    }

    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let totals = &self.totals;
        let mut summary = String::new();
        let _ = writeln!(summary, "Simulation Report (seed: {})", self.seed);
        let _ = writeln!(summary, "Window: {}", self.window);
        let _ = writeln!(
            summary,
            "Adversary: {} guards ({} bw), {} exits ({} bw)",
            self.adversary_guards,
            self.adversary_guard_bandwidth,
            self.adversary_exits,
            self.adversary_exit_bandwidth
        );
        let _ = writeln!(
            summary,
            "Clients: {} ({} exposed, {} truncated)",
            self.clients, self.clients_exposed, self.truncated_clients
        );
        let _ = writeln!(
            summary,
            "Circuits: {} built, {} failed, {} relaxed, {} reused",
            totals.circuits_built, totals.circuits_failed, totals.circuits_relaxed, totals.circuits_reused
        );
        let _ = writeln!(
            summary,
            "Streams: {} ({} dropped), packets: {}, bytes: {}",
            totals.streams, totals.streams_dropped, totals.packets, totals.bytes
        );
        let _ = writeln!(
            summary,
            "Observability: {} correlatable ({:.2}%), {} guard only, {} exit only",
            totals.correlatable_circuits,
            self.correlatable_share() * 100.0,
            totals.guard_only_circuits,
            totals.exit_only_circuits
        );
        let _ = writeln!(summary, "Events: {}", self.events);
        for (kind, count) in &self.events_by_type {
            let _ = writeln!(summary, "  {kind}: {count}");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_observability_is_classified() {
        let mut metrics = ClientMetrics::default();
        let observe = |guard_compromised, exit_compromised| ObservationRecord {
            guard_compromised,
            exit_compromised,
        };

        metrics.record_circuit(observe(true, true), false);
        metrics.record_circuit(observe(true, false), true);
        metrics.record_circuit(observe(false, true), false);
        metrics.record_circuit(observe(false, false), false);

        assert_eq!(metrics.circuits_built, 4);
        assert_eq!(metrics.circuits_relaxed, 1);
        assert_eq!(metrics.correlatable_circuits, 1);
        assert_eq!(metrics.guard_only_circuits, 1);
        assert_eq!(metrics.exit_only_circuits, 1);
    }

    #[test]
    fn test_failure_rate() {
        let mut metrics = ClientMetrics::default();
        assert_eq!(metrics.failure_rate(), 0.0);

        metrics.circuits_built = 3;
        metrics.circuits_failed = 1;
        assert!((metrics.failure_rate() - 0.25).abs() < 1e-12);

        let mut totals = ClientMetrics::default();
        totals.absorb(&metrics);
        totals.absorb(&metrics);
        assert_eq!(totals.circuits_built, 6);
        assert_eq!(totals.circuits_failed, 2);
    }
}
