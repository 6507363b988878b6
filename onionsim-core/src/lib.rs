//! onionsim core - network model for anonymity-network traffic simulation
//!
//! This crate holds everything a simulated client needs to know about the
//! network and its own behavior: the time-indexed relay catalog, the
//! adversary footprint, Tor-style path selection and the statistical
//! traffic models. It performs no scheduling and writes no traces.

pub mod adversary;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod path;
pub mod policy;
pub mod relay;
pub mod time;
pub mod tracing_setup;
pub mod traffic;

// Re-export main types for convenient access
pub use adversary::{
    AdversaryBudget, AdversaryError, AdversaryFootprint, AdversaryModel, ObservationRecord,
};
pub use catalog::{CatalogError, ConsensusEpoch, EpochStats, Position, PositionWeights, RelayCatalog};
pub use config::{AdversaryConfig, ConfigError, PathConfig, SimulationConfig};
pub use dataset::{DatasetError, load_catalog};
pub use path::{CircuitPath, GuardAssignment, PathSelector, RotationReason, SelectionError};
pub use policy::{ExitPolicy, PolicyParseError};
pub use relay::{Flag, Relay, RelayFlags, RelayId};
pub use time::TimeWindow;
pub use traffic::{ModelError, TrafficModel};
