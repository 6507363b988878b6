use chrono::Duration;
use onionsim_core::adversary::AdversaryFootprint;
use onionsim_core::config::SimulationConfig;
use onionsim_core::path::{ExclusionLevel, PathSelector};
use onionsim_core::relay::RelayId;

use super::*;
use crate::client::{ClientContext, ClientOutcome, ClientSimulation};
use crate::test_network::{catalog, config, traffic};

fn outcomes(config: &SimulationConfig) -> Vec<ClientOutcome> {
    let catalog = catalog();
    let traffic = traffic();
    let selector = PathSelector::new(config.path.clone());
    let footprint = AdversaryFootprint::empty();
    let ctx = ClientContext {
        catalog: &catalog,
        traffic: &traffic,
        selector: &selector,
        footprint: &footprint,
        clock: SimClock::new(config.window, config.tick),
        seed: config.seed,
        max_events: config.max_events_per_client,
    };
    (0..6)
        .map(|client| ClientSimulation::new(ctx, client).run().unwrap())
        .collect()
}

/// First outcome with at least one circuit.
fn busy_outcome() -> ClientOutcome {
    outcomes(&config())
        .into_iter()
        .find(|outcome| !outcome.circuits.is_empty())
        .expect("some client builds a circuit")
}

fn clock() -> SimClock {
    let config = config();
    SimClock::new(config.window, config.tick)
}

#[test]
fn test_simulated_outcomes_satisfy_standard_invariants() {
    let catalog = catalog();
    let invariants = standard_invariants(&catalog, clock());
    assert_eq!(invariants.len(), 4);

    for outcome in outcomes(&config()) {
        for invariant in &invariants {
            if let Err(violation) = invariant.check(&outcome) {
                panic!("{violation}");
            }
        }
    }
}

#[test]
fn test_shared_guard_and_exit_is_reported() {
    let catalog = catalog();
    let mut outcome = busy_outcome();
    let circuit = &mut outcome.circuits[0];
    circuit.exit = circuit.guard;

    let violation = CircuitDisjointnessInvariant::new(&catalog)
        .check(&outcome)
        .unwrap_err();
    assert_eq!(violation.invariant, "CircuitDisjointness");
    assert_eq!(violation.client_id, outcome.client_id);
}

#[test]
fn test_family_pair_is_reported_at_strict_level() {
    let catalog = catalog();
    let mut outcome = busy_outcome();
    let circuit = &mut outcome.circuits[0];
    circuit.guard = RelayId::new(0);
    circuit.exit = RelayId::new(1);
    circuit.middle = None;
    circuit.level = ExclusionLevel::Strict;
    circuit.created_at = crate::test_network::start();

    let violation = CircuitDisjointnessInvariant::new(&catalog)
        .check(&outcome)
        .unwrap_err();
    assert!(violation.description.contains("pairs relays"));
}

#[test]
fn test_rejected_port_is_reported() {
    let catalog = catalog();
    let mut outcome = busy_outcome();
    outcome.streams[0].port = 1;
    // relay 5 only accepts 80 and 443
    let circuit_id = outcome.streams[0].circuit_id;
    for circuit in outcome.circuits.iter_mut().filter(|circuit| circuit.id == circuit_id) {
        circuit.exit = RelayId::new(5);
    }

    let violation = ExitPolicyInvariant::new(&catalog).check(&outcome).unwrap_err();
    assert_eq!(violation.invariant, "ExitPolicy");
}

#[test]
fn test_event_before_creation_is_reported() {
    let mut outcome = busy_outcome();
    outcome.events.remove(0);

    let violation = MonotoneCircuitInvariant.check(&outcome).unwrap_err();
    assert!(violation.description.contains("starts with"));
}

#[test]
fn test_unclosed_circuit_is_reported() {
    let mut outcome = busy_outcome();
    outcome.events.pop();

    let violation = MonotoneCircuitInvariant.check(&outcome).unwrap_err();
    assert!(violation.description.contains("never closes"));
}

#[test]
fn test_event_outside_window_is_reported() {
    let clock = clock();
    let mut outcome = busy_outcome();
    let last = outcome.events.len() - 1;
    outcome.events[last].record.timestamp_ms = clock.end_millis();

    let violation = WindowInvariant::new(clock).check(&outcome).unwrap_err();
    assert_eq!(violation.invariant, "Window");
    assert!(violation.to_string().contains("Window"));
}

#[test]
fn test_coarse_tick_keeps_invariants() {
    let config = SimulationConfig {
        tick: Duration::seconds(10),
        ..config()
    };
    let catalog = catalog();
    let invariants = standard_invariants(&catalog, SimClock::new(config.window, config.tick));

    for outcome in outcomes(&config) {
        for event in &outcome.events {
            assert_eq!(event.record.timestamp_ms % 10_000, 0);
        }
        for invariant in &invariants {
            assert!(invariant.check(&outcome).is_ok());
        }
    }
}

#[test]
fn test_report_totals_match_outcomes() {
    let outcomes = outcomes(&config());
    let mut report = RunReport::new(42, config().window, &AdversaryFootprint::empty());
    for outcome in &outcomes {
        report.record(outcome);
    }

    let events: usize = outcomes.iter().map(|outcome| outcome.events.len()).sum();
    assert_eq!(report.clients, 6);
    assert_eq!(report.events, events as u64);
    assert_eq!(report.events_by_type.values().sum::<u64>(), report.events);
    assert_eq!(report.clients_exposed, 0);
    assert_eq!(report.correlatable_share(), 0.0);

    let summary = report.summary();
    assert!(summary.contains("seed: 42"));
    assert!(summary.contains("Clients: 6"));
}
