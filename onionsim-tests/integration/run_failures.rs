//! Fatal errors abort runs with the right category and no finished trace.

use onionsim_core::{AdversaryBudget, Flag, TimeWindow};
use onionsim_sim::trace::incomplete_path;
use onionsim_sim::{ErrorCategory, SimulationError};

use crate::fixtures::{Inputs, config};

#[test]
fn test_window_outside_dataset_is_a_configuration_error() {
    let inputs = Inputs::create();
    let mut config = config();
    config.window = TimeWindow::parse("2023-12-31:23:00", "2024-01-01:01:00").unwrap();

    let error = inputs.run(config, "run.trace").unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Configuration);
    assert_eq!(error.exit_code(), 2);
    assert!(!inputs.output("run.trace").exists());
    assert!(!incomplete_path(&inputs.output("run.trace")).exists());
}

#[test]
fn test_window_beyond_last_consensus_is_rejected() {
    let inputs = Inputs::create();
    let mut config = config();
    config.window = TimeWindow::parse("2024-01-01:03:00", "2024-01-01:05:00").unwrap();

    let error = inputs.run(config, "run.trace").unwrap_err();
    assert!(matches!(error, SimulationError::Catalog(_)));
}

#[test]
fn test_invalid_stream_model_is_a_model_error() {
    let inputs = Inputs::create();
    inputs.write_stream_model(
        r#"{
            "clients": 10,
            "inter_arrival_secs": { "type": "exponential", "rate": -1.0 },
            "ports": [ { "port": 443, "weight": 1.0 } ],
            "bytes": { "type": "constant", "value": 1000 }
        }"#,
    );

    let error = inputs.run(config(), "run.trace").unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Model);
    assert!(error.to_string().contains("inter_arrival_secs"));
}

#[test]
fn test_missing_dataset_is_a_configuration_error() {
    let inputs = Inputs::create();
    std::fs::remove_dir_all(&inputs.tor_data).unwrap();

    let error = inputs.run(config(), "run.trace").unwrap_err();
    assert!(matches!(error, SimulationError::Dataset(_)));
    assert_eq!(error.category(), ErrorCategory::Configuration);
}

#[test]
fn test_infeasible_adversary_writes_nothing() {
    let inputs = Inputs::create();
    let mut config = config();
    // 16 guards carry far less than this
    config.adversary.guards = AdversaryBudget::new(2, 10_000_000);

    let error = inputs.run(config, "run.trace").unwrap_err();
    assert_eq!(error.category(), ErrorCategory::AdversaryBudget);
    assert_eq!(error.exit_code(), 4);
    assert!(!incomplete_path(&inputs.output("run.trace")).exists());
}

#[test]
fn test_unwritable_output_is_a_configuration_error() {
    let inputs = Inputs::create();
    let error = inputs.run(config(), "missing/dir/run.trace").unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Configuration);
    assert!(error.to_string().contains("not writable"));
}

#[test]
fn test_selection_failures_above_threshold_abort() {
    let inputs = Inputs::create();
    let mut config = config();
    // no exit in the fixture network is Stable
    config.path.required_flags = config.path.required_flags.with(Flag::Stable);

    let error = inputs.run(config, "run.trace").unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Selection);
    assert!(matches!(error, SimulationError::FailureRateExceeded { .. }));
    assert!(!inputs.output("run.trace").exists());
    assert!(incomplete_path(&inputs.output("run.trace")).exists());
}

#[test]
fn test_selection_failures_below_threshold_are_tolerated() {
    let inputs = Inputs::create();
    let mut config = config();
    config.path.required_flags = config.path.required_flags.with(Flag::Stable);
    config.max_failure_rate = 1.0;

    let report = inputs.run(config, "run.trace").unwrap();
    assert_eq!(report.totals.circuits_built, 0);
    assert!(report.totals.circuits_failed > 0);
    assert_eq!(report.totals.streams_dropped, report.totals.streams);
    assert!(inputs.output("run.trace").exists());
}
