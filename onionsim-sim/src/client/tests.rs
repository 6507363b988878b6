use chrono::Duration;
use onionsim_core::catalog::{ConsensusEpoch, PositionWeights};
use onionsim_core::config::SimulationConfig;
use onionsim_core::relay::{Flag, Relay, RelayFlags};

use super::*;
use crate::test_network::{catalog, config, start, traffic};

fn simulate_with(catalog: &RelayCatalog, config: &SimulationConfig, client_id: u32) -> ClientOutcome {
    let traffic = traffic();
    let selector = PathSelector::new(config.path.clone());
    let footprint = AdversaryFootprint::empty();
    let ctx = ClientContext {
        catalog,
        traffic: &traffic,
        selector: &selector,
        footprint: &footprint,
        clock: SimClock::new(config.window, config.tick),
        seed: config.seed,
        max_events: config.max_events_per_client,
    };
    ClientSimulation::new(ctx, client_id).run().unwrap()
}

fn simulate(client_id: u32) -> ClientOutcome {
    simulate_with(&catalog(), &config(), client_id)
}

#[test]
fn test_client_starts_created_and_ends_retired() {
    let catalog = catalog();
    let traffic = traffic();
    let config = config();
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

    let client = ClientSimulation::new(ctx, 0);
    assert_eq!(client.phase(), ClientPhase::Created);
    let outcome = client.run().unwrap();
    assert_eq!(outcome.phase, ClientPhase::Retired);
    assert!(!outcome.truncated);
}

#[test]
fn test_events_are_ordered_and_inside_window() {
    let window = config().window;
    let (from, to) = (window.from().timestamp_millis(), window.to().timestamp_millis());

    for client_id in 0..4 {
        let outcome = simulate(client_id);
        assert!(!outcome.events.is_empty());
        assert!(outcome.events.windows(2).all(|pair| pair[0] < pair[1]));
        for event in &outcome.events {
            assert!((from..to).contains(&event.record.timestamp_ms));
            assert_eq!(event.record.client_id, client_id);
            assert_eq!(event.record.circuit_id >> CIRCUIT_INDEX_BITS, u64::from(client_id));
        }
    }
}

#[test]
fn test_streams_ride_exits_that_allow_their_port() {
    let catalog = catalog();
    for client_id in 0..6 {
        let outcome = simulate(client_id);
        for stream in &outcome.streams {
            assert!(matches!(stream.port, 22 | 443));
            let circuit = outcome
                .circuits
                .iter()
                .find(|circuit| circuit.id == stream.circuit_id)
                .unwrap();
            let exit = catalog
                .epoch_for(circuit.created_at)
                .unwrap()
                .relay(circuit.exit)
                .unwrap();
            assert!(exit.allows_port(stream.port));
            assert!(circuit.created_at <= stream.start);
            assert!(stream.start < circuit.expires_at);
        }
    }
}

#[test]
fn test_open_circuits_are_reused() {
    let mut reused = 0;
    for client_id in 0..6 {
        let outcome = simulate(client_id);
        let attached: usize = outcome.circuits.iter().map(|circuit| circuit.streams.len()).sum();
        assert_eq!(attached, outcome.streams.len());
        assert_eq!(
            outcome.metrics.streams,
            outcome.metrics.circuits_reused
                + outcome.metrics.circuits_built
                + outcome.metrics.streams_dropped
        );
        reused += outcome.metrics.circuits_reused;
    }
    // streams arrive every 20s on average while circuits stay open for 10 minutes
    assert!(reused > 0);
}

#[test]
fn test_circuits_close_after_their_last_packet() {
    let outcome = simulate(1);
    for circuit in &outcome.circuits {
        assert!(circuit.closed_at >= circuit.last_activity);
        assert!(circuit.closed_at >= circuit.created_at);
        assert!(circuit.closed_at <= outcome.session.departure);
    }
    let closed = outcome
        .events
        .iter()
        .filter(|event| event.record.kind == EventKind::CircuitClosed)
        .count();
    assert_eq!(closed, outcome.circuits.len());
}

fn rotation_relay(raw: u32, guard: bool) -> Relay {
    let mut flags = RelayFlags::from_flags(&[Flag::Valid, Flag::Running, Flag::Fast]);
    if guard {
        flags = flags.with(Flag::Guard);
    }
    if raw % 2 == 1 {
        flags = flags.with(Flag::Exit);
    }
    Relay::new(RelayId::new(raw), 2_000, flags)
}

#[test]
fn test_guard_rotates_when_it_leaves_the_consensus() {
    // relay 10 guards the first half hour, relay 20 the second
    let shared = || (1..8).map(|raw| rotation_relay(raw, false));
    let first: Vec<Relay> = shared().chain([rotation_relay(10, true)]).collect();
    let second: Vec<Relay> = shared().chain([rotation_relay(20, true)]).collect();
    let catalog = RelayCatalog::from_epochs(vec![
        ConsensusEpoch::new(start(), start() + Duration::hours(1), PositionWeights::uniform(), first),
        ConsensusEpoch::new(
            start() + Duration::minutes(30),
            start() + Duration::hours(2),
            PositionWeights::uniform(),
            second,
        ),
    ])
    .unwrap();
    let half = start() + Duration::minutes(30);

    for client_id in 0..3 {
        let outcome = simulate_with(&catalog, &config(), client_id);
        assert_eq!(outcome.metrics.guard_rotations, 1);
        assert_eq!(outcome.metrics.circuits_failed, 0);
        assert!(outcome.circuits.iter().any(|circuit| circuit.created_at >= half));
        for circuit in &outcome.circuits {
            let expected = if circuit.created_at < half { 10 } else { 20 };
            assert_eq!(circuit.guard, RelayId::new(expected));
        }
    }
}

#[test]
fn test_same_client_is_reproducible() {
    let first = simulate(3);
    let second = simulate(3);
    assert_eq!(first.events, second.events);
    assert_eq!(first.circuits, second.circuits);
    assert_eq!(first.metrics, second.metrics);

    let other = simulate(4);
    assert_ne!(first.events, other.events);
}

#[test]
fn test_event_cap_truncates_client() {
    let full = simulate(2);
    let config = SimulationConfig {
        max_events_per_client: 20,
        ..config()
    };
    let capped = simulate_with(&catalog(), &config, 2);

    assert!(capped.truncated);
    assert_eq!(capped.phase, ClientPhase::Retired);
    assert!(capped.metrics.streams < full.metrics.streams);
    assert!(capped.events.len() < full.events.len());
    // every circuit still closes
    let closed = capped
        .events
        .iter()
        .filter(|event| event.record.kind == EventKind::CircuitClosed)
        .count();
    assert_eq!(closed, capped.circuits.len());
}

#[test]
fn test_coalesced_packets_keep_stream_bytes() {
    let outcome = simulate(5);
    let packet_bytes: u64 = outcome
        .events
        .iter()
        .filter(|event| event.record.kind.is_packet())
        .map(|event| event.record.size_bytes)
        .sum();
    let packet_events = outcome
        .events
        .iter()
        .filter(|event| event.record.kind.is_packet())
        .count();
    assert_eq!(packet_bytes, outcome.metrics.bytes);
    assert!(outcome.metrics.packets >= packet_events as u64);
}
