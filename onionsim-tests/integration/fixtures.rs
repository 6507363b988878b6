//! On-disk inputs shared by the integration tests.
//!
//! Two consensus snapshots of a 48-relay network an hour apart, a stream
//! model and a packet model, all written into a temporary directory.

use std::fs;
use std::path::PathBuf;

use onionsim_core::{RelayCatalog, SimulationConfig, TimeWindow, TrafficModel, load_catalog};
use onionsim_sim::{RunReport, SimulationError, SimulationScheduler};
use serde_json::{Value, json};
use tempfile::TempDir;

pub const RELAYS: u32 = 48;

const STREAM_MODEL: &str = r#"{
    "clients": 24,
    "inter_arrival_secs": { "type": "exponential", "rate": 0.02 },
    "ports": [ { "port": 443, "weight": 0.8 }, { "port": 80, "weight": 0.15 }, { "port": 22, "weight": 0.05 } ],
    "bytes": { "type": "log_normal", "mu": 9.0, "sigma": 1.0 },
    "max_stream_bytes": 500000,
    "session": { "arrival_spread_secs": 600 }
}"#;

const PACKET_MODEL: &str = r#"{
    "initial": [ { "state": "request", "weight": 1.0 } ],
    "port_initial": { "22": [ { "state": "interactive", "weight": 1.0 } ] },
    "states": {
        "request":     { "outbound_probability": 0.95, "size_bytes": {"type":"uniform","low":60,"high":600},
                         "delay_secs": {"type":"exponential","rate":5.0},
                         "transitions": [ { "state": "response", "weight": 1.0 } ] },
        "response":    { "outbound_probability": 0.05, "size_bytes": {"type":"constant","value":1400},
                         "delay_secs": {"type":"exponential","rate":50.0},
                         "transitions": [ { "state": "response", "weight": 9.0 }, { "state": "request", "weight": 1.0 } ] },
        "interactive": { "outbound_probability": 0.5, "size_bytes": {"type":"constant","value":100},
                         "delay_secs": {"type":"pareto","scale":0.2,"shape":1.5},
                         "transitions": [ { "state": "interactive", "weight": 1.0 } ] }
    },
    "max_packets_per_stream": 2000
}"#;

pub fn fingerprint(raw: u32) -> String {
    format!("{:040X}", raw + 1)
}

fn relay(raw: u32) -> Value {
    let mut flags = vec!["Fast", "Running", "Valid"];
    if raw % 2 == 0 {
        flags.push("Stable");
    }
    if raw % 3 == 0 {
        flags.push("Guard");
    }
    let exit = raw % 4 == 1;
    if exit {
        flags.push("Exit");
    }
    let policy = match (exit, raw % 8) {
        (false, _) => "reject 1-65535",
        (true, 5) => "accept 80,443",
        (true, _) => "accept 1-65535",
    };
    let family: Vec<String> = match raw {
        0 => vec![fingerprint(1)],
        1 => vec![format!("${}", fingerprint(0))],
        _ => Vec::new(),
    };

    json!({
        "fingerprint": fingerprint(raw),
        "nickname": format!("relay{raw}"),
        "address": format!("10.{raw}.0.1"),
        "bandwidth": 1_000 + u64::from(raw) * 250,
        "flags": flags,
        "family": family,
        "exit_policy": policy,
    })
}

fn consensus(valid_after: &str, relays: impl Iterator<Item = u32>) -> Value {
    json!({
        "valid_after": valid_after,
        "valid_until": "2024-01-01T04:00:00Z",
        "bandwidth_weights": { "Wgg": 6000, "Wgd": 4000, "Wmg": 4000, "Wmm": 10000, "Wee": 10000, "Wed": 6000 },
        "relays": relays.map(relay).collect::<Vec<_>>(),
    })
}

/// Input files of one test.
pub struct Inputs {
    dir: TempDir,
    pub tor_data: PathBuf,
    pub stream_model: PathBuf,
    pub packet_model: PathBuf,
}

impl Inputs {
    pub fn create() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let tor_data = dir.path().join("consensus");
        fs::create_dir(&tor_data).unwrap();

        // relay 3 leaves and relay 48 joins at 01:00
        let first = consensus("2024-01-01T00:00:00Z", 0..RELAYS);
        let second = consensus(
            "2024-01-01T01:00:00Z",
            (0..=RELAYS).filter(|raw| *raw != 3),
        );
        fs::write(tor_data.join("2024-01-01-00.json"), first.to_string()).unwrap();
        fs::write(tor_data.join("2024-01-01-01.json"), second.to_string()).unwrap();

        let stream_model = dir.path().join("streams.json");
        let packet_model = dir.path().join("packets.json");
        fs::write(&stream_model, STREAM_MODEL).unwrap();
        fs::write(&packet_model, PACKET_MODEL).unwrap();

        Self {
            dir,
            tor_data,
            stream_model,
            packet_model,
        }
    }

    /// Path for an output file inside the test directory.
    pub fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Overwrites the stream model.
    pub fn write_stream_model(&self, json: &str) {
        fs::write(&self.stream_model, json).unwrap();
    }

    pub fn catalog(&self) -> RelayCatalog {
        load_catalog(&self.tor_data).unwrap()
    }

    /// Loads every input and runs the simulation into `output`.
    pub fn run(&self, config: SimulationConfig, output: &str) -> Result<RunReport, SimulationError> {
        let catalog = load_catalog(&self.tor_data)?;
        let traffic = TrafficModel::load(&self.stream_model, &self.packet_model)?;
        let scheduler = SimulationScheduler::new(&catalog, &traffic, config)?;
        scheduler.run_to_path(&self.output(output))
    }
}

/// Two hours starting at the first consensus.
pub fn window() -> TimeWindow {
    TimeWindow::parse("2024-01-01:00:00", "2024-01-01:02:00").unwrap()
}

/// Serial run over the model's own client count.
pub fn config() -> SimulationConfig {
    SimulationConfig {
        window: window(),
        clients: None,
        ..SimulationConfig::deterministic_testing()
    }
}
