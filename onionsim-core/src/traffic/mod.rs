//! Statistical traffic models.
//!
//! A stream model describes when a client opens streams, to which port and
//! how many bytes each carries. A packet model is a Markov chain describing
//! packet timing, size and direction within a stream. Both are read from
//! JSON, validated completely at load, and sampled through lazy iterators
//! that own their random source.

mod distribution;
mod packet_model;
mod sampler;
mod stream_model;

use std::path::Path;

pub use distribution::{DistributionSpec, ValueDistribution};
pub use packet_model::{PacketModel, PacketModelSpec, StateSpec, StateWeight};
pub use sampler::{
    ClientSession, Direction, Packet, PacketSampler, Stream, StreamSampler, TrafficModel,
};
pub use stream_model::{PortWeight, SessionSpec, StreamModel, StreamModelSpec};

/// Errors from loading traffic models.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid model configuration for {field}: {reason}")]
    InvalidModelConfig { field: String, reason: String },

    #[error("Failed to read model file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Failed to parse model file {path}: {reason}")]
    Malformed { path: String, reason: String },
}

impl ModelError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ModelError::InvalidModelConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let text = std::fs::read_to_string(path).map_err(|e| ModelError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| ModelError::Malformed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
