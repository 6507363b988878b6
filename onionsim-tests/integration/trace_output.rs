//! Properties of a completed trace file.

use std::collections::{BTreeSet, HashMap};
use std::fs;

use onionsim_core::{AdversaryBudget, ObservationRecord};
use onionsim_sim::trace::{TRACE_HEADER, incomplete_path};
use onionsim_sim::{EventKind, TraceReader, TraceRecord};

use crate::fixtures::{Inputs, config, window};

fn adversarial_run(inputs: &Inputs) -> (onionsim_sim::RunReport, Vec<TraceRecord>) {
    let mut config = config();
    config.adversary.guards = AdversaryBudget::new(5, 0);
    config.adversary.exits = AdversaryBudget::new(0, 20_000);
    let report = inputs.run(config, "run.trace").unwrap();
    let trace = TraceReader::open(&inputs.output("run.trace"))
        .unwrap()
        .read_all()
        .unwrap();
    assert!(trace.is_complete());
    (report, trace.records)
}

#[test]
fn test_trace_file_layout() {
    let inputs = Inputs::create();
    let (report, records) = adversarial_run(&inputs);

    let path = inputs.output("run.trace");
    assert!(path.exists());
    assert!(!incomplete_path(&path).exists());

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], TRACE_HEADER);
    assert_eq!(lines[1], TraceRecord::COLUMNS);
    assert_eq!(lines.len(), records.len() + 3);

    let circuits: BTreeSet<u64> = records.iter().map(|record| record.circuit_id).collect();
    assert_eq!(
        lines[lines.len() - 1],
        format!(
            "# complete events={} clients={} circuits={}",
            records.len(),
            report.clients,
            circuits.len()
        )
    );
    assert_eq!(circuits.len() as u64, report.totals.circuits_built);
}

#[test]
fn test_records_are_totally_ordered_and_in_window() {
    let inputs = Inputs::create();
    let (_, records) = adversarial_run(&inputs);
    let window = window();
    let range = window.from().timestamp_millis()..window.to().timestamp_millis();

    for pair in records.windows(2) {
        let first = (pair[0].timestamp_ms, pair[0].client_id, pair[0].circuit_id);
        let second = (pair[1].timestamp_ms, pair[1].client_id, pair[1].circuit_id);
        assert!(first <= second);
    }
    for record in &records {
        assert!(range.contains(&record.timestamp_ms));
        assert_eq!(record.timestamp_ms % 1000, 0);
        assert_eq!(record.circuit_id >> 24, u64::from(record.client_id));
        assert_ne!(record.guard, record.exit);
        if !record.kind.is_packet() && record.kind != EventKind::StreamStarted {
            assert_eq!(record.size_bytes, 0);
        }
    }
}

#[test]
fn test_circuits_keep_relays_and_observation() {
    let inputs = Inputs::create();
    let (report, records) = adversarial_run(&inputs);

    let mut circuits: HashMap<u64, (&TraceRecord, Vec<EventKind>)> = HashMap::new();
    for record in &records {
        let entry = circuits.entry(record.circuit_id).or_insert((record, Vec::new()));
        assert_eq!(entry.0.guard, record.guard);
        assert_eq!(entry.0.exit, record.exit);
        assert_eq!(entry.0.observation, record.observation);
        entry.1.push(record.kind);
    }

    for (_, kinds) in circuits.values() {
        assert_eq!(kinds.first(), Some(&EventKind::CircuitCreated));
        assert_eq!(kinds.last(), Some(&EventKind::CircuitClosed));
    }

    let correlatable = circuits
        .values()
        .filter(|(first, _)| first.observation.is_correlatable())
        .count() as u64;
    assert_eq!(correlatable, report.totals.correlatable_circuits);

    // with five compromised guards some circuits must start at one of them
    let guard_seen = circuits
        .values()
        .any(|(first, _)| first.observation.guard_compromised);
    assert_eq!(guard_seen, report.totals.correlatable_circuits + report.totals.guard_only_circuits > 0);
}

#[test]
fn test_no_adversary_observes_nothing() {
    let inputs = Inputs::create();
    let report = inputs.run(config(), "clean.trace").unwrap();
    let trace = TraceReader::open(&inputs.output("clean.trace"))
        .unwrap()
        .read_all()
        .unwrap();

    assert_eq!(report.adversary_guards, 0);
    assert_eq!(report.clients_exposed, 0);
    assert!(
        trace
            .records
            .iter()
            .all(|record| record.observation == ObservationRecord::default())
    );
}

#[test]
fn test_guard_leaving_consensus_forces_rotation() {
    let inputs = Inputs::create();
    let (report, records) = adversarial_run(&inputs);
    let later = window().from().timestamp_millis() + 3_600_000;
    let fingerprint_id = inputs
        .catalog()
        .epochs()
        .first()
        .and_then(|epoch| {
            epoch
                .relays()
                .iter()
                .find(|relay| relay.fingerprint == crate::fixtures::fingerprint(3))
                .map(|relay| relay.id)
        })
        .unwrap();

    // relay 3 is absent from the second consensus
    assert!(
        records
            .iter()
            .filter(|record| record.kind == EventKind::CircuitCreated && record.timestamp_ms >= later)
            .all(|record| record.guard != fingerprint_id && record.exit != fingerprint_id)
    );
    assert!(report.totals.circuits_built > 0);
}
