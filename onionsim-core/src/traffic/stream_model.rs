//! Stream-level traffic model.

use std::path::Path;

use chrono::Duration;
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

use super::distribution::{DistributionSpec, ValueDistribution, weight_index};
use super::{ModelError, read_json};
use crate::time::duration_from_secs;

/// Upper bound on a single stream's volume when the model sets none.
const DEFAULT_MAX_STREAM_BYTES: u64 = 1 << 30;

/// Destination port with its relative popularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortWeight {
    pub port: u16,
    pub weight: f64,
}

/// Client session timing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSpec {
    /// Clients arrive uniformly within this many seconds after the window starts
    #[serde(default)]
    pub arrival_spread_secs: f64,
    /// Session length; clients stay until the window ends when absent
    #[serde(default)]
    pub duration_secs: Option<DistributionSpec>,
}

/// Stream model as written in a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamModelSpec {
    /// Baseline number of simulated clients
    pub clients: usize,
    /// Seconds between consecutive streams of one client
    pub inter_arrival_secs: DistributionSpec,
    pub ports: Vec<PortWeight>,
    /// Total bytes carried by a stream, both directions
    pub bytes: DistributionSpec,
    #[serde(default)]
    pub max_stream_bytes: Option<u64>,
    #[serde(default)]
    pub session: SessionSpec,
}

/// Validated stream model.
#[derive(Debug, Clone)]
pub struct StreamModel {
    clients: usize,
    inter_arrival: ValueDistribution,
    ports: Vec<u16>,
    port_index: WeightedIndex<f64>,
    bytes: ValueDistribution,
    max_stream_bytes: u64,
    arrival_spread: Duration,
    session_duration: Option<ValueDistribution>,
}

impl StreamModel {
    /// Validates a parsed model document.
    ///
    /// # Errors
    ///
    /// - `ModelError::InvalidModelConfig` - If any field is out of range or a distribution is malformed
    pub fn from_spec(spec: &StreamModelSpec) -> Result<Self, ModelError> {
        if spec.clients == 0 {
            return Err(ModelError::invalid("clients", "must be positive"));
        }
        if spec.ports.is_empty() {
            return Err(ModelError::invalid("ports", "port table is empty"));
        }
        if let Some(entry) = spec.ports.iter().find(|entry| entry.port == 0) {
            return Err(ModelError::invalid("ports", format!("port {} is not a destination", entry.port)));
        }
        let weights: Vec<f64> = spec.ports.iter().map(|entry| entry.weight).collect();
        let port_index = weight_index(&weights).map_err(|reason| ModelError::invalid("ports", reason))?;

        let max_stream_bytes = spec.max_stream_bytes.unwrap_or(DEFAULT_MAX_STREAM_BYTES);
        if max_stream_bytes == 0 {
            return Err(ModelError::invalid("max_stream_bytes", "must be positive"));
        }

        let spread = spec.session.arrival_spread_secs;
        if !spread.is_finite() || spread < 0.0 {
            return Err(ModelError::invalid(
                "session.arrival_spread_secs",
                format!("must be a non-negative number, got {spread}"),
            ));
        }
        let session_duration = spec
            .session
            .duration_secs
            .as_ref()
            .map(|duration| duration.compile_non_negative("session.duration_secs"))
            .transpose()?;

        Ok(Self {
            clients: spec.clients,
            inter_arrival: spec.inter_arrival_secs.compile_non_negative("inter_arrival_secs")?,
            ports: spec.ports.iter().map(|entry| entry.port).collect(),
            port_index,
            bytes: spec.bytes.compile_non_negative("bytes")?,
            max_stream_bytes,
            arrival_spread: duration_from_secs(spread),
            session_duration,
        })
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// - `ModelError::Malformed` - If the JSON does not match the schema
    /// - `ModelError::InvalidModelConfig` - If validation fails
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let spec: StreamModelSpec = serde_json::from_str(json).map_err(|e| ModelError::Malformed {
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
        let spec: StreamModelSpec = read_json(path)?;
        Self::from_spec(&spec)
    }

    /// Baseline client count.
    pub fn clients(&self) -> usize {
        self.clients
    }

    /// Largest stream volume.
    pub fn max_stream_bytes(&self) -> u64 {
        self.max_stream_bytes
    }

    /// Window within which clients arrive.
    pub fn arrival_spread(&self) -> Duration {
        self.arrival_spread
    }

    /// Samples the gap before the next stream, at least one millisecond.
    pub fn sample_gap<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        duration_from_secs(self.inter_arrival.sample(rng)).max(Duration::milliseconds(1))
    }

    /// Samples a destination port.
    pub fn sample_port<R: Rng + ?Sized>(&self, rng: &mut R) -> u16 {
        self.ports[self.port_index.sample(rng)]
    }

    /// Samples a stream volume in `[1, max_stream_bytes]`.
    pub fn sample_bytes<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let bytes = self.bytes.sample(rng);
        if !bytes.is_finite() || bytes < 1.0 {
            return 1;
        }
        (bytes.round() as u64).clamp(1, self.max_stream_bytes)
    }

    /// Samples a session length, if sessions are bounded.
    pub fn sample_session_length<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Duration> {
        self.session_duration
            .as_ref()
            .map(|distribution| duration_from_secs(distribution.sample(rng)))
    }
}
