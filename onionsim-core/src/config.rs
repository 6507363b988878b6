//! Centralized run configuration for onionsim.
//!
//! All tunable parameters are defined here so that the scheduler, path
//! selector and adversary model never carry hard-coded constants.

use chrono::{DateTime, Duration, Utc};

use crate::adversary::AdversaryBudget;
use crate::relay::{Flag, RelayFlags};
use crate::time::TimeWindow;

/// Errors from invalid run configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid time '{value}': {reason}")]
    InvalidTime { value: String, reason: String },

    #[error("Simulation window is empty: from {from} is not before to {to}")]
    EmptyWindow {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    #[error("Load scale must be a positive finite number, got {value}")]
    InvalidLoadScale { value: f64 },

    #[error("Tick resolution must be positive, got {millis} ms")]
    InvalidTick { millis: i64 },

    #[error("Maximum failure rate must lie in [0, 1], got {value}")]
    InvalidFailureRate { value: f64 },

    #[error("At least one relay selection attempt is required")]
    NoSelectionAttempts,

    #[error("Adversary tolerance must lie in (0, 1), got {value}")]
    InvalidTolerance { value: f64 },

    #[error("Invalid {name}: {reason}")]
    InvalidDuration { name: &'static str, reason: String },

    #[error("Client count override must be positive")]
    NoClients,

    #[error("Input path {path} is unusable: {reason}")]
    InvalidInput { path: String, reason: String },

    #[error("Output path {path} is not writable: {reason}")]
    UnwritableOutput { path: String, reason: String },
}

/// Configuration of a complete simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Run seed every random draw derives from
    pub seed: u64,
    /// Simulated time range
    pub window: TimeWindow,
    /// Multiplier on the traffic model's baseline client count
    pub load_scale: f64,
    /// Baseline client count replacing the stream model's value
    pub clients: Option<usize>,
    /// Trace timestamp resolution
    pub tick: Duration,
    /// Worker threads for client simulation (0 = one per core, 1 = serial)
    pub workers: usize,
    /// Highest tolerated share of failed circuit builds
    pub max_failure_rate: f64,
    /// Cap on events a single client may emit
    pub max_events_per_client: usize,
    /// Validate each client's outcome against run invariants
    pub check_invariants: bool,
    pub path: PathConfig,
    pub adversary: AdversaryConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            window: TimeWindow::default(),
            load_scale: 1.0,
            clients: None,
            tick: Duration::seconds(1),
            workers: 0,
            max_failure_rate: 0.05,
            max_events_per_client: 5_000_000,
            check_invariants: true,
            path: PathConfig::default(),
            adversary: AdversaryConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Creates compact fixed-seed profile for tests.
    pub fn deterministic_testing() -> Self {
        Self {
            seed: 42,
            clients: Some(8),
            workers: 1,
            max_events_per_client: 200_000,
            ..Self::default()
        }
    }

    /// Number of clients after applying the load scale to `baseline`.
    ///
    /// The override in [`SimulationConfig::clients`] takes precedence over
    /// `baseline`. The result is never below one.
    pub fn scaled_clients(&self, baseline: usize) -> usize {
        let baseline = self.clients.unwrap_or(baseline) as f64;
        ((baseline * self.load_scale).round() as usize).max(1)
    }

    /// Checks every parameter for consistency.
    ///
    /// # Errors
    ///
    /// - `ConfigError` - Naming the first invalid parameter
    pub fn validate(&self) -> Result<(), ConfigError> {
        TimeWindow::new(self.window.from(), self.window.to())?;

        if !self.load_scale.is_finite() || self.load_scale <= 0.0 {
            return Err(ConfigError::InvalidLoadScale {
                value: self.load_scale,
            });
        }
        if self.tick <= Duration::zero() {
            return Err(ConfigError::InvalidTick {
                millis: self.tick.num_milliseconds(),
            });
        }
        if !(0.0..=1.0).contains(&self.max_failure_rate) {
            return Err(ConfigError::InvalidFailureRate {
                value: self.max_failure_rate,
            });
        }
        if self.clients == Some(0) {
            return Err(ConfigError::NoClients);
        }

        self.path.validate()?;
        self.adversary.validate()
    }
}

/// Path selection parameters.
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Flags every hop must carry
    pub required_flags: RelayFlags,
    /// Build three-hop circuits with a middle relay
    pub middle_hop: bool,
    /// Selection attempts before a circuit build fails
    pub max_attempts: usize,
    /// Relax subnet, then family, exclusion on retries
    pub relax_exclusions: bool,
    /// Shortest guard lifetime
    pub guard_lifetime_min: Duration,
    /// Longest guard lifetime
    pub guard_lifetime_max: Duration,
    /// How long a circuit accepts new streams
    pub circuit_lifetime: Duration,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            required_flags: RelayFlags::from_flags(&[Flag::Valid, Flag::Running]),
            middle_hop: true,
            max_attempts: 3,
            relax_exclusions: true,
            guard_lifetime_min: Duration::days(30),
            guard_lifetime_max: Duration::days(60),
            circuit_lifetime: Duration::minutes(10),
        }
    }
}

impl PathConfig {
    /// Checks attempt count and lifetimes.
    ///
    /// # Errors
    ///
    /// - `ConfigError::NoSelectionAttempts` - If `max_attempts` is zero
    /// - `ConfigError::InvalidDuration` - If a lifetime is non-positive or the guard range is inverted
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::NoSelectionAttempts);
        }
        if self.guard_lifetime_min <= Duration::zero()
            || self.guard_lifetime_min > self.guard_lifetime_max
        {
            return Err(ConfigError::InvalidDuration {
                name: "guard lifetime",
                reason: format!(
                    "range {}s..{}s is empty or non-positive",
                    self.guard_lifetime_min.num_seconds(),
                    self.guard_lifetime_max.num_seconds()
                ),
            });
        }
        if self.circuit_lifetime <= Duration::zero() {
            return Err(ConfigError::InvalidDuration {
                name: "circuit lifetime",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Adversary footprint targets.
#[derive(Debug, Clone)]
pub struct AdversaryConfig {
    /// Compromised guard target
    pub guards: AdversaryBudget,
    /// Compromised exit target
    pub exits: AdversaryBudget,
    /// Accepted relative deviation from a bandwidth target
    pub tolerance: f64,
    /// Upper bound on swap rounds while repairing a bandwidth mismatch
    pub max_swaps: usize,
}

impl Default for AdversaryConfig {
    fn default() -> Self {
        Self {
            guards: AdversaryBudget::default(),
            exits: AdversaryBudget::default(),
            tolerance: 0.05,
            max_swaps: 10_000,
        }
    }
}

impl AdversaryConfig {
    /// Checks the bandwidth tolerance.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidTolerance` - If tolerance is outside `(0, 1)`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(ConfigError::InvalidTolerance {
                value: self.tolerance,
            });
        }
        Ok(())
    }
}
