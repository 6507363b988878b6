//! Identical inputs give byte-identical traces, whatever the worker count.

use std::fs;

use onionsim_core::{AdversaryBudget, SimulationConfig};

use crate::fixtures::{Inputs, config};

fn adversarial() -> SimulationConfig {
    let mut config = config();
    config.adversary.guards = AdversaryBudget::new(4, 0);
    config.adversary.exits = AdversaryBudget::new(3, 0);
    config
}

#[test]
fn test_serial_and_parallel_traces_are_identical() {
    let inputs = Inputs::create();
    let serial = inputs.run(adversarial(), "serial.trace").unwrap();
    let parallel = inputs
        .run(
            SimulationConfig {
                workers: 4,
                ..adversarial()
            },
            "parallel.trace",
        )
        .unwrap();

    assert_eq!(serial, parallel);
    assert!(serial.events > 0);
    assert_eq!(
        fs::read(inputs.output("serial.trace")).unwrap(),
        fs::read(inputs.output("parallel.trace")).unwrap()
    );
}

#[test]
fn test_repeated_runs_are_identical() {
    let inputs = Inputs::create();
    inputs.run(adversarial(), "first.trace").unwrap();
    inputs.run(adversarial(), "second.trace").unwrap();

    assert_eq!(
        fs::read(inputs.output("first.trace")).unwrap(),
        fs::read(inputs.output("second.trace")).unwrap()
    );
}

#[test]
fn test_different_seeds_give_different_traces() {
    let inputs = Inputs::create();
    inputs.run(adversarial(), "seed42.trace").unwrap();
    inputs
        .run(
            SimulationConfig {
                seed: 7,
                ..adversarial()
            },
            "seed7.trace",
        )
        .unwrap();

    assert_ne!(
        fs::read(inputs.output("seed42.trace")).unwrap(),
        fs::read(inputs.output("seed7.trace")).unwrap()
    );
}
