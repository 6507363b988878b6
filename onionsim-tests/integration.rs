//! Integration tests for onionsim
//!
//! Runs complete simulations from on-disk inputs through the scheduler and
//! checks the written traces.

#[path = "integration/fixtures.rs"]
mod fixtures;

#[path = "integration/determinism.rs"]
mod determinism;
#[path = "integration/load_scale.rs"]
mod load_scale;
#[path = "integration/run_failures.rs"]
mod run_failures;
#[path = "integration/trace_output.rs"]
mod trace_output;
