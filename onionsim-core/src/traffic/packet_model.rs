//! Packet-level Markov traffic model.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Duration;
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

use super::distribution::{DistributionSpec, ValueDistribution, weight_index};
use super::{ModelError, read_json};
use crate::time::duration_from_secs;

fn default_max_packets() -> usize {
    100_000
}

/// Weighted reference to a named state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateWeight {
    pub state: String,
    pub weight: f64,
}

/// One Markov state as written in a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSpec {
    /// Probability that a packet emitted in this state travels client to server
    pub outbound_probability: f64,
    pub size_bytes: DistributionSpec,
    /// Delay before the next packet
    pub delay_secs: DistributionSpec,
    /// Successor states; none makes the state terminal
    #[serde(default)]
    pub transitions: Vec<StateWeight>,
}

/// Packet model as written in a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PacketModelSpec {
    pub initial: Vec<StateWeight>,
    /// Start states per destination port, overriding `initial`
    #[serde(default)]
    pub port_initial: BTreeMap<String, Vec<StateWeight>>,
    pub states: BTreeMap<String, StateSpec>,
    #[serde(default = "default_max_packets")]
    pub max_packets_per_stream: usize,
}

#[derive(Debug, Clone)]
struct StateTable {
    targets: Vec<usize>,
    index: WeightedIndex<f64>,
}

impl StateTable {
    fn compile(
        field: &str,
        entries: &[StateWeight],
        names: &BTreeMap<&str, usize>,
    ) -> Result<Self, ModelError> {
        let mut targets = Vec::with_capacity(entries.len());
        for entry in entries {
            let target = names.get(entry.state.as_str()).ok_or_else(|| {
                ModelError::invalid(field, format!("unknown state '{}'", entry.state))
            })?;
            targets.push(*target);
        }
        let weights: Vec<f64> = entries.iter().map(|entry| entry.weight).collect();
        let index = weight_index(&weights).map_err(|reason| ModelError::invalid(field, reason))?;
        Ok(Self { targets, index })
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.targets[self.index.sample(rng)]
    }
}

#[derive(Debug, Clone)]
struct State {
    outbound_probability: f64,
    size: ValueDistribution,
    delay: ValueDistribution,
    next: Option<StateTable>,
}

/// Validated packet model.
#[derive(Debug, Clone)]
pub struct PacketModel {
    states: Vec<State>,
    initial: StateTable,
    port_initial: BTreeMap<u16, StateTable>,
    max_packets_per_stream: usize,
}

impl PacketModel {
    /// Validates a parsed model document.
    ///
    /// # Errors
    ///
    /// - `ModelError::InvalidModelConfig` - If the chain has no states, references unknown states, has unusable weights or invalid distributions
    pub fn from_spec(spec: &PacketModelSpec) -> Result<Self, ModelError> {
        if spec.states.is_empty() {
            return Err(ModelError::invalid("states", "packet model has no states"));
        }
        if spec.initial.is_empty() {
            return Err(ModelError::invalid("initial", "no initial state"));
        }
        if spec.max_packets_per_stream == 0 {
            return Err(ModelError::invalid("max_packets_per_stream", "must be positive"));
        }

        let names: BTreeMap<&str, usize> = spec
            .states
            .keys()
            .enumerate()
            .map(|(index, name)| (name.as_str(), index))
            .collect();

        let mut states = Vec::with_capacity(spec.states.len());
        for (name, state) in &spec.states {
            let p = state.outbound_probability;
            if !(0.0..=1.0).contains(&p) {
                return Err(ModelError::invalid(
                    &format!("states.{name}.outbound_probability"),
                    format!("must lie in [0, 1], got {p}"),
                ));
            }
            let next = if state.transitions.is_empty() {
                None
            } else {
                Some(StateTable::compile(
                    &format!("states.{name}.transitions"),
                    &state.transitions,
                    &names,
                )?)
            };
            states.push(State {
                outbound_probability: p,
                size: state.size_bytes.compile_non_negative(&format!("states.{name}.size_bytes"))?,
                delay: state.delay_secs.compile_non_negative(&format!("states.{name}.delay_secs"))?,
                next,
            });
        }

        let initial = StateTable::compile("initial", &spec.initial, &names)?;

        let mut port_initial = BTreeMap::new();
        for (port, entries) in &spec.port_initial {
            let field = format!("port_initial.{port}");
            let parsed: u16 = port
                .parse()
                .map_err(|_| ModelError::invalid(&field, "key is not a port number"))?;
            port_initial.insert(parsed, StateTable::compile(&field, entries, &names)?);
        }

        Ok(Self {
            states,
            initial,
            port_initial,
            max_packets_per_stream: spec.max_packets_per_stream,
        })
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// - `ModelError::Malformed` - If the JSON does not match the schema
    /// - `ModelError::InvalidModelConfig` - If validation fails
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let spec: PacketModelSpec = serde_json::from_str(json).map_err(|e| ModelError::Malformed {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_spec(&spec)
    }

    /// Reads, parses and validates a model file.
    ///
    /// # Errors
    ///
    /// - `ModelError::Unreadable` - If the file cannot be read
    /// - `ModelError::Malformed` - If the JSON does not match the schema
    /// - `ModelError::InvalidModelConfig` - If validation fails
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let spec: PacketModelSpec = read_json(path)?;
        Self::from_spec(&spec)
    }

    /// Packet cap per stream.
    pub fn max_packets_per_stream(&self) -> usize {
        self.max_packets_per_stream
    }

    pub(crate) fn initial_state<R: Rng + ?Sized>(&self, port: u16, rng: &mut R) -> usize {
        self.port_initial
            .get(&port)
            .unwrap_or(&self.initial)
            .sample(rng)
    }

    /// Emits one packet in `state`: (outbound, size, delay to next packet, next state).
    pub(crate) fn step<R: Rng + ?Sized>(
        &self,
        state: usize,
        rng: &mut R,
    ) -> (bool, u64, Duration, Option<usize>) {
        let state = &self.states[state];
        let outbound = rng.random_bool(state.outbound_probability);
        let size = state.size.sample(rng);
        let size = if size.is_finite() && size >= 1.0 {
            size.round() as u64
        } else {
            1
        };
        let delay = duration_from_secs(state.delay.sample(rng));
        let next = state.next.as_ref().map(|table| table.sample(rng));
        (outbound, size, delay, next)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    const MODEL: &str = r#"{
        "initial": [ { "state": "request", "weight": 1.0 } ],
        "port_initial": { "22": [ { "state": "interactive", "weight": 1.0 } ] },
        "states": {
            "request":  { "outbound_probability": 0.95, "size_bytes": {"type":"uniform","low":60,"high":600},
                          "delay_secs": {"type":"exponential","rate":50.0},
                          "transitions": [ { "state": "response", "weight": 1.0 } ] },
            "response": { "outbound_probability": 0.05, "size_bytes": {"type":"constant","value":1400},
                          "delay_secs": {"type":"exponential","rate":500.0},
                          "transitions": [ { "state": "response", "weight": 9.0 }, { "state": "request", "weight": 1.0 } ] },
            "interactive": { "outbound_probability": 0.5, "size_bytes": {"type":"constant","value":90},
                          "delay_secs": {"type":"constant","value":0.2} }
        },
        "max_packets_per_stream": 1000
    }"#;

    #[test]
    fn test_parse_documented_model() {
        let model = PacketModel::from_json(MODEL).unwrap();
        assert_eq!(model.max_packets_per_stream(), 1000);

        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let ssh = model.initial_state(22, &mut rng);
        let (_, size, delay, next) = model.step(ssh, &mut rng);
        assert_eq!(size, 90);
        assert_eq!(delay, Duration::milliseconds(200));
        assert_eq!(next, None);

        let web = model.initial_state(443, &mut rng);
        assert_ne!(web, ssh);
        let (_, size, _, next) = model.step(web, &mut rng);
        assert!((60..=600).contains(&size));
        assert!(next.is_some());
    }

    #[test]
    fn test_invalid_chains_fail_at_load() {
        let cases = [
            MODEL.replace(r#""state": "response", "weight": 1.0"#, r#""state": "missing", "weight": 1.0"#),
            MODEL.replace(r#""outbound_probability": 0.95"#, r#""outbound_probability": 1.5"#),
            MODEL.replace(r#""rate":500.0"#, r#""rate":-500.0"#),
            MODEL.replace(r#""value":1400"#, r#""value":-1400"#),
            MODEL.replace(r#""low":60,"high":600"#, r#""low":-600,"high":-60"#),
            MODEL.replace(r#""value":0.2"#, r#""value":-0.2"#),
            MODEL.replace(r#""22": ["#, r#""ssh": ["#),
            MODEL.replace(r#""max_packets_per_stream": 1000"#, r#""max_packets_per_stream": 0"#),
            MODEL.replace(
                r#""initial": [ { "state": "request", "weight": 1.0 } ]"#,
                r#""initial": []"#,
            ),
            MODEL.replace(
                r#"{ "state": "response", "weight": 9.0 }, { "state": "request", "weight": 1.0 }"#,
                r#"{ "state": "response", "weight": 0.0 }"#,
            ),
        ];
        for case in cases {
            assert!(
                matches!(
                    PacketModel::from_json(&case),
                    Err(ModelError::InvalidModelConfig { .. })
                ),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn test_empty_state_table_is_rejected() {
        let json = r#"{ "initial": [ { "state": "a", "weight": 1 } ], "states": {} }"#;
        assert!(matches!(
            PacketModel::from_json(json),
            Err(ModelError::InvalidModelConfig { .. })
        ));
    }
}
