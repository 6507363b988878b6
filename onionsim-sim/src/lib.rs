//! onionsim simulation engine - deterministic traffic simulation over a relay catalog.
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! Simulates synthetic clients building circuits through a Tor-like network
//! and records every circuit, stream and packet with whether an adversary
//! controls the circuit's guard and exit.
//!
//! # Determinism
//!
//! Each client draws from its own ChaCha8 sub-streams keyed by the run seed
//! and client id. Clients are simulated in parallel and their locally
//! ordered events are merged under a total order, so a run's trace is a
//! function of its seed and inputs only, whatever the worker count.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use onionsim_core::{SimulationConfig, TrafficModel, load_catalog};
//! use onionsim_sim::SimulationScheduler;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = load_catalog(Path::new("data/consensus"))?;
//! let traffic = TrafficModel::load(Path::new("streams.json"), Path::new("packets.json"))?;
//!
//! let scheduler = SimulationScheduler::new(&catalog, &traffic, SimulationConfig::default())?;
//! let report = scheduler.run_to_path(Path::new("run.trace"))?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod deterministic;
pub mod scheduler;
pub mod trace;

use std::fmt;

use onionsim_core::{AdversaryError, CatalogError, ConfigError, DatasetError, ModelError};

pub use client::{Circuit, ClientContext, ClientOutcome, ClientPhase, ClientSimulation, StreamRecord};
pub use deterministic::{
    ClientMetrics, DeterministicRng, Draw, EventKind, Invariant, InvariantViolation, RunReport,
    SimClock, TraceEvent, TraceRecord,
};
pub use scheduler::SimulationScheduler;
pub use trace::{TraceError, TraceFile, TraceReader, TraceRecorder, TraceSummary};

/// Category of a fatal error, each with its own process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Model,
    AdversaryBudget,
    Selection,
    Io,
    Internal,
}

impl ErrorCategory {
    /// Returns the process exit code for this category.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorCategory::Configuration => 2,
            ErrorCategory::Model => 3,
            ErrorCategory::AdversaryBudget => 4,
            ErrorCategory::Selection => 5,
            ErrorCategory::Io => 6,
            ErrorCategory::Internal => 70,
        }
    }

    /// Returns the short name printed with error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Model => "model",
            ErrorCategory::AdversaryBudget => "adversary-budget",
            ErrorCategory::Selection => "selection",
            ErrorCategory::Io => "io",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Adversary(#[from] AdversaryError),

    #[error(
        "Circuit build failure rate {rate:.4} ({failed} of {attempted}) exceeds the limit {limit}"
    )]
    FailureRateExceeded {
        failed: u64,
        attempted: u64,
        rate: f64,
        limit: f64,
    },

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error("Worker pool unavailable: {reason}")]
    WorkerPool { reason: String },
}

impl SimulationError {
    /// Returns the category deciding the exit code.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SimulationError::Config(_)
            | SimulationError::Catalog(_)
            | SimulationError::Dataset(_)
            | SimulationError::Model(ModelError::Unreadable { .. }) => ErrorCategory::Configuration,
            SimulationError::Model(_) => ErrorCategory::Model,
            SimulationError::Adversary(_) => ErrorCategory::AdversaryBudget,
            SimulationError::FailureRateExceeded { .. } => ErrorCategory::Selection,
            SimulationError::Trace(TraceError::OutOfOrder { .. })
            | SimulationError::Invariant(_)
            | SimulationError::WorkerPool { .. } => ErrorCategory::Internal,
            SimulationError::Trace(_) => ErrorCategory::Io,
        }
    }

    /// Returns the process exit code, never zero.
    pub fn exit_code(&self) -> u8 {
        self.category().exit_code()
    }

    /// Checks if this error is due to user input rather than a defect.
    pub fn is_user_error(&self) -> bool {
        !matches!(self.category(), ErrorCategory::Internal | ErrorCategory::Io)
    }
}

#[cfg(test)]
mod test_network;

#[cfg(test)]
mod tests {
    use onionsim_core::adversary::AdversaryBudget;
    use onionsim_core::catalog::Position;

    use super::*;

    #[test]
    fn test_error_categories_and_exit_codes() {
        let unreadable = SimulationError::from(ModelError::Unreadable {
            path: "streams.json".to_string(),
            reason: "missing".to_string(),
        });
        assert_eq!(unreadable.category(), ErrorCategory::Configuration);

        let invalid = SimulationError::from(ModelError::InvalidModelConfig {
            field: "bytes".to_string(),
            reason: "negative".to_string(),
        });
        assert_eq!(invalid.category(), ErrorCategory::Model);

        let budget = SimulationError::from(AdversaryError::BudgetInfeasible {
            position: Position::Guard,
            budget: AdversaryBudget::new(10, 0),
            reason: "pool too small".to_string(),
        });
        assert_eq!(budget.category(), ErrorCategory::AdversaryBudget);
        assert_eq!(budget.exit_code(), 4);

        let io = SimulationError::from(TraceError::Write {
            path: "run.trace".to_string(),
            reason: "disk full".to_string(),
        });
        assert_eq!(io.category(), ErrorCategory::Io);
        assert!(!io.is_user_error());

        let codes: std::collections::HashSet<u8> = [
            ErrorCategory::Configuration,
            ErrorCategory::Model,
            ErrorCategory::AdversaryBudget,
            ErrorCategory::Selection,
            ErrorCategory::Io,
            ErrorCategory::Internal,
        ]
        .into_iter()
        .map(ErrorCategory::exit_code)
        .collect();
        assert_eq!(codes.len(), 6);
        assert!(!codes.contains(&0));
    }
}
