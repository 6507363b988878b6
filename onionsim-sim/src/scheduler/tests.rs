use std::io;

use onionsim_core::adversary::AdversaryBudget;
use onionsim_core::catalog::CatalogError;
use onionsim_core::time::TimeWindow;

use super::*;
use crate::ErrorCategory;
use crate::test_network::{catalog, config, start, traffic};
use crate::trace::{TraceError, TraceReader, incomplete_path};

fn run(config: SimulationConfig) -> (RunReport, Vec<u8>) {
    let catalog = catalog();
    let traffic = traffic();
    let scheduler = SimulationScheduler::new(&catalog, &traffic, config).unwrap();
    let mut output = Vec::new();
    let report = scheduler.run_to_writer(&mut output).unwrap();
    (report, output)
}

#[test]
fn test_serial_and_parallel_runs_are_byte_identical() {
    let serial = run(SimulationConfig {
        workers: 1,
        ..config()
    });
    let parallel = run(SimulationConfig {
        workers: 4,
        ..config()
    });
    assert_eq!(serial.1, parallel.1);
    assert_eq!(serial.0, parallel.0);
    assert!(serial.0.totals.circuits_built > 0);
}

#[test]
fn test_seed_changes_output() {
    let first = run(config());
    let second = run(SimulationConfig { seed: 43, ..config() });
    assert_ne!(first.1, second.1);
}

#[test]
fn test_trace_matches_report() {
    let (report, output) = run(config());
    let trace = TraceReader::new(output.as_slice()).unwrap().read_all().unwrap();

    assert!(trace.is_complete());
    assert_eq!(trace.records.len() as u64, report.events);
    assert_eq!(trace.packet_bytes(), report.totals.bytes);
    let summary = trace.summary.unwrap();
    assert_eq!(summary.clients, report.clients);
    assert_eq!(summary.circuits, report.totals.circuits_built);
}

#[test]
fn test_adversary_is_reflected_in_trace() {
    let mut config = config();
    config.adversary.guards = AdversaryBudget::new(3, 0);
    config.adversary.exits = AdversaryBudget::new(2, 0);
    let (report, output) = run(config);

    assert_eq!(report.adversary_guards, 3);
    assert_eq!(report.adversary_exits, 2);
    let trace = TraceReader::new(output.as_slice()).unwrap().read_all().unwrap();
    let compromised = trace
        .records
        .iter()
        .filter(|record| record.observation.guard_compromised || record.observation.exit_compromised)
        .count();
    assert_eq!(
        compromised > 0,
        report.totals.guard_only_circuits
            + report.totals.exit_only_circuits
            + report.totals.correlatable_circuits
            > 0
    );
}

#[test]
fn test_uncovered_window_is_rejected() {
    let catalog = catalog();
    let traffic = traffic();
    let config = SimulationConfig {
        window: TimeWindow::new(start() - chrono::Duration::hours(1), start()).unwrap(),
        ..config()
    };
    let error = SimulationScheduler::new(&catalog, &traffic, config).unwrap_err();
    assert!(matches!(
        error,
        SimulationError::Catalog(CatalogError::DataUnavailable { .. })
    ));
    assert_eq!(error.category(), ErrorCategory::Configuration);
}

#[test]
fn test_infeasible_adversary_aborts_before_output() {
    let catalog = catalog();
    let traffic = traffic();
    let mut config = config();
    config.adversary.guards = AdversaryBudget::new(1_000, 0);
    let scheduler = SimulationScheduler::new(&catalog, &traffic, config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.trace");
    let error = scheduler.run_to_path(&path).unwrap_err();
    assert_eq!(error.category(), ErrorCategory::AdversaryBudget);
    assert!(!path.exists());
    assert!(!incomplete_path(&path).exists());
}

#[test]
fn test_failure_threshold_aborts_run() {
    let catalog = catalog();
    let traffic = traffic();
    let mut config = config();
    config.path.relax_exclusions = false;
    config.path.required_flags = config.path.required_flags.with(onionsim_core::Flag::Stable);
    config.max_failure_rate = 0.0;
    let scheduler = SimulationScheduler::new(&catalog, &traffic, config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.trace");
    let error = scheduler.run_to_path(&path).unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Selection);
    assert!(!path.exists());
    assert!(incomplete_path(&path).exists());
}

#[test]
fn test_load_scale_scales_clients() {
    let catalog = catalog();
    let traffic = traffic();
    let scaled = SimulationScheduler::new(
        &catalog,
        &traffic,
        SimulationConfig {
            load_scale: 2.5,
            ..config()
        },
    )
    .unwrap();
    assert_eq!(scaled.client_count(), 20);
}

#[test]
fn test_failed_rerun_removes_earlier_trace() {
    let catalog = catalog();
    let traffic = traffic();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.trace");

    let scheduler = SimulationScheduler::new(&catalog, &traffic, config()).unwrap();
    scheduler.run_to_path(&path).unwrap();
    assert!(TraceReader::open(&path).unwrap().read_all().unwrap().is_complete());

    let mut failing = config();
    failing.path.relax_exclusions = false;
    failing.path.required_flags = failing.path.required_flags.with(onionsim_core::Flag::Stable);
    failing.max_failure_rate = 0.0;
    let scheduler = SimulationScheduler::new(&catalog, &traffic, failing).unwrap();
    let error = scheduler.run_to_path(&path).unwrap_err();

    assert_eq!(error.category(), ErrorCategory::Selection);
    assert!(!path.exists());
    let partial = TraceReader::open(&incomplete_path(&path)).unwrap().read_all().unwrap();
    assert!(!partial.is_complete());
}

/// Accepts `budget` bytes, then fails every write.
struct FailingWriter<'a> {
    accepted: &'a mut Vec<u8>,
    budget: usize,
}

impl io::Write for FailingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.budget - self.accepted.len();
        if room == 0 {
            return Err(io::Error::other("disk full"));
        }
        let n = buf.len().min(room);
        self.accepted.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_write_failure_mid_run_is_fatal() {
    let catalog = catalog();
    let traffic = traffic();
    let scheduler = SimulationScheduler::new(&catalog, &traffic, config()).unwrap();
    let footprint = scheduler.select_adversary().unwrap();

    let mut accepted = Vec::new();
    let writer = FailingWriter {
        accepted: &mut accepted,
        budget: 2_048,
    };
    let error = scheduler
        .run_with(&footprint, TraceRecorder::new(writer).unwrap())
        .unwrap_err();

    assert!(matches!(error, SimulationError::Trace(TraceError::Write { .. })));
    assert_eq!(error.category(), ErrorCategory::Io);
    assert_eq!(accepted.len(), 2_048);
    let text = String::from_utf8_lossy(&accepted);
    assert!(text.starts_with(crate::trace::TRACE_HEADER));
    assert!(!text.contains("# complete"));
}
