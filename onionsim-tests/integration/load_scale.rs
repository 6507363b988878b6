//! Load scale multiplies the client population and with it the traffic volume.

use onionsim_core::SimulationConfig;
use onionsim_sim::{TraceReader, TraceRecord};

use crate::fixtures::{Inputs, config};

fn scaled(inputs: &Inputs, load_scale: f64, output: &str) -> Vec<TraceRecord> {
    let report = inputs
        .run(
            SimulationConfig {
                load_scale,
                ..config()
            },
            output,
        )
        .unwrap();
    assert_eq!(report.clients, (24.0 * load_scale).round().max(1.0) as usize);

    TraceReader::open(&inputs.output(output))
        .unwrap()
        .read_all()
        .unwrap()
        .records
}

fn packet_bytes(records: &[TraceRecord]) -> u64 {
    records
        .iter()
        .filter(|record| record.kind.is_packet())
        .map(|record| record.size_bytes)
        .sum()
}

#[test]
fn test_double_load_doubles_volume() {
    let inputs = Inputs::create();
    let base = scaled(&inputs, 1.0, "base.trace");
    let double = scaled(&inputs, 2.0, "double.trace");

    let ratio = packet_bytes(&double) as f64 / packet_bytes(&base) as f64;
    assert!((1.7..=2.3).contains(&ratio), "volume ratio {ratio}");
}

#[test]
fn test_scaled_run_extends_the_base_population() {
    let inputs = Inputs::create();
    let base = scaled(&inputs, 1.0, "base.trace");
    let double = scaled(&inputs, 2.0, "double.trace");

    // clients keep their sub-streams, so the first 24 behave identically
    let shared: Vec<&TraceRecord> = double.iter().filter(|record| record.client_id < 24).collect();
    assert_eq!(shared.len(), base.len());
    assert!(shared.iter().zip(&base).all(|(scaled, base)| *scaled == base));
    assert!(double.iter().any(|record| record.client_id >= 24));
}

#[test]
fn test_fractional_load_keeps_at_least_one_client() {
    let inputs = Inputs::create();
    let records = scaled(&inputs, 0.01, "tiny.trace");
    assert!(records.iter().all(|record| record.client_id == 0));
}
