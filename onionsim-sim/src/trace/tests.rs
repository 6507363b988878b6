use onionsim_core::adversary::ObservationRecord;
use onionsim_core::relay::RelayId;

use super::*;
use crate::deterministic::circuit_id;

fn event(timestamp_ms: i64, client_id: u32, kind: EventKind, seq: u64) -> TraceEvent {
    TraceEvent {
        record: TraceRecord {
            timestamp_ms,
            client_id,
            circuit_id: circuit_id(client_id, 0),
            guard: RelayId::new(1),
            exit: RelayId::new(2),
            kind,
            size_bytes: if kind.is_packet() { 512 } else { 0 },
            observation: ObservationRecord::default(),
        },
        seq,
    }
}

fn sample() -> Vec<TraceEvent> {
    vec![
        event(1_000, 0, EventKind::CircuitCreated, 0),
        event(1_000, 0, EventKind::PacketOut, 1),
        event(1_000, 1, EventKind::CircuitCreated, 0),
        event(2_000, 0, EventKind::CircuitClosed, 2),
        event(3_000, 1, EventKind::CircuitClosed, 1),
    ]
}

#[test]
fn test_file_trace_is_sealed_by_rename() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.trace");

    let mut recorder = TraceRecorder::create(&path).unwrap();
    for event in sample() {
        recorder.record(&event).unwrap();
    }
    assert!(incomplete_path(&path).exists());
    assert!(!path.exists());

    let summary = recorder.finish(2).unwrap();
    assert_eq!(
        summary,
        TraceSummary {
            events: 5,
            clients: 2,
            circuits: 2
        }
    );
    assert!(path.exists());
    assert!(!incomplete_path(&path).exists());

    let trace = TraceReader::open(&path).unwrap().read_all().unwrap();
    assert!(trace.is_complete());
    assert_eq!(trace.records.len(), 5);
    assert_eq!(trace.packet_bytes(), 512);

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.ends_with("# complete events=5 clients=2 circuits=2\n"));
}

#[test]
fn test_create_removes_earlier_sealed_trace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.trace");
    let mut recorder = TraceRecorder::create(&path).unwrap();
    recorder.record(&sample()[0]).unwrap();
    recorder.finish(1).unwrap();
    assert!(path.exists());

    let rerun = TraceRecorder::create(&path).unwrap();
    assert!(!path.exists());
    drop(rerun);
    assert!(incomplete_path(&path).exists());
}

#[test]
fn test_unfinished_trace_reads_as_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.trace");
    let mut recorder = TraceRecorder::create(&path).unwrap();
    recorder.record(&sample()[0]).unwrap();
    drop(recorder);

    let trace = TraceReader::open(&incomplete_path(&path))
        .unwrap()
        .read_all()
        .unwrap();
    assert!(!trace.is_complete());
    assert_eq!(trace.records.len(), 1);
}

#[test]
fn test_out_of_order_events_are_refused() {
    let mut recorder = TraceRecorder::new(Vec::new()).unwrap();
    let events = sample();
    recorder.record(&events[2]).unwrap();
    assert_eq!(
        recorder.record(&events[1]),
        Err(TraceError::OutOfOrder { index: 1 })
    );
    assert_eq!(
        recorder.record(&events[2]),
        Err(TraceError::OutOfOrder { index: 1 })
    );
}

#[test]
fn test_reader_rejects_bad_headers_and_trailing_content() {
    let bad_header = "# other trace\n";
    assert!(matches!(
        TraceReader::new(bad_header.as_bytes()),
        Err(TraceError::Malformed { line: 1, .. })
    ));

    let trailing = format!(
        "{TRACE_HEADER}\n{}\n# complete events=0 clients=0 circuits=0\n1,0,0,1,2,packet_in,1,false,false\n",
        TraceRecord::COLUMNS
    );
    let result = TraceReader::new(trailing.as_bytes()).unwrap().read_all();
    assert!(matches!(result, Err(TraceError::Malformed { line: 4, .. })));
}

#[test]
fn test_unwritable_location_fails_at_create() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("run.trace");
    assert!(matches!(
        TraceRecorder::create(&path),
        Err(TraceError::Write { .. })
    ));
}
