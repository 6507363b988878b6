//! Small two-epoch network and traffic model shared by unit tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use onionsim_core::catalog::{ConsensusEpoch, PositionWeights, RelayCatalog};
use onionsim_core::config::SimulationConfig;
use onionsim_core::policy::ExitPolicy;
use onionsim_core::relay::{Flag, Relay, RelayFlags, RelayId};
use onionsim_core::time::TimeWindow;
use onionsim_core::traffic::{PacketModel, StreamModel, TrafficModel};

const STREAMS: &str = r#"{
    "clients": 6,
    "inter_arrival_secs": { "type": "exponential", "rate": 0.05 },
    "ports": [ { "port": 443, "weight": 0.9 }, { "port": 22, "weight": 0.1 } ],
    "bytes": { "type": "constant", "value": 20000 },
    "session": { "arrival_spread_secs": 300 }
}"#;

const PACKETS: &str = r#"{
    "initial": [ { "state": "request", "weight": 1.0 } ],
    "states": {
        "request":  { "outbound_probability": 0.9, "size_bytes": {"type":"constant","value":500},
                      "delay_secs": {"type":"exponential","rate":4.0},
                      "transitions": [ { "state": "response", "weight": 1.0 } ] },
        "response": { "outbound_probability": 0.1, "size_bytes": {"type":"constant","value":1400},
                      "delay_secs": {"type":"exponential","rate":20.0},
                      "transitions": [ { "state": "response", "weight": 4.0 }, { "state": "request", "weight": 1.0 } ] }
    },
    "max_packets_per_stream": 200
}"#;

pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub(crate) fn window() -> TimeWindow {
    TimeWindow::new(start(), start() + Duration::hours(1)).unwrap()
}

fn relay(raw: u32) -> Relay {
    let mut flags = RelayFlags::from_flags(&[Flag::Valid, Flag::Running, Flag::Fast]);
    if raw % 3 == 0 {
        flags = flags.with(Flag::Guard);
    }
    if raw % 4 == 1 {
        flags = flags.with(Flag::Exit);
    }
    let relay = Relay::new(RelayId::new(raw), 1_000 + u64::from(raw) * 150, flags);
    if raw % 8 == 5 {
        relay.with_exit_policy(ExitPolicy::accept_ports(&[80, 443]))
    } else {
        relay
    }
}

/// Thirty relays until half past, then the same network without relay 0.
pub(crate) fn catalog() -> RelayCatalog {
    let relays: Vec<Relay> = (0..30)
        .map(|raw| match raw {
            0 => relay(0).with_family([RelayId::new(1)]),
            _ => relay(raw),
        })
        .collect();
    let later: Vec<Relay> = relays.iter().filter(|relay| relay.id.as_u32() != 0).cloned().collect();

    let first = ConsensusEpoch::new(
        start(),
        start() + Duration::hours(1),
        PositionWeights::uniform(),
        relays,
    );
    let second = ConsensusEpoch::new(
        start() + Duration::minutes(30),
        start() + Duration::hours(2),
        PositionWeights::uniform(),
        later,
    );
    RelayCatalog::from_epochs(vec![first, second]).unwrap()
}

pub(crate) fn traffic() -> TrafficModel {
    TrafficModel::new(
        StreamModel::from_json(STREAMS).unwrap(),
        PacketModel::from_json(PACKETS).unwrap(),
    )
}

pub(crate) fn config() -> SimulationConfig {
    SimulationConfig {
        window: window(),
        ..SimulationConfig::deterministic_testing()
    }
}
