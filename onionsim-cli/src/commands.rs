//! Run wiring: flags to configuration, inputs to scheduler.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Duration;
use clap::Args;
use onionsim_core::{
    AdversaryBudget, ConfigError, RelayCatalog, SimulationConfig, TimeWindow, TrafficModel,
    load_catalog,
};
use onionsim_sim::{RunReport, SimulationError, SimulationScheduler};
use tracing::info;

/// Options describing one simulation run.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Directory of consensus JSON files
    #[arg(long, value_name = "DIR")]
    pub tor_data: PathBuf,

    /// Window start, YYYY-MM-DD:HH:MM (UTC)
    #[arg(long)]
    pub from: String,

    /// Window end (exclusive), YYYY-MM-DD:HH:MM (UTC)
    #[arg(long)]
    pub to: String,

    /// Stream-level traffic model
    #[arg(long, value_name = "FILE")]
    pub stream_model: PathBuf,

    /// Packet-level traffic model
    #[arg(long, value_name = "FILE")]
    pub packet_model: PathBuf,

    /// Trace output path
    #[arg(long, value_name = "FILE")]
    pub output_trace: PathBuf,

    /// Multiplier on the model's client count
    #[arg(long, default_value_t = 1.0)]
    pub load_scale: f64,

    /// Number of compromised guards
    #[arg(long, default_value_t = 0)]
    pub adv_guards_num: usize,

    /// Aggregate bandwidth of compromised guards, 0 for any
    #[arg(long, default_value_t = 0)]
    pub adv_guards_bw: u64,

    /// Number of compromised exits
    #[arg(long, default_value_t = 0)]
    pub adv_exits_num: usize,

    /// Aggregate bandwidth of compromised exits, 0 for any
    #[arg(long, default_value_t = 0)]
    pub adv_exits_bw: u64,

    /// Run seed
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Worker threads (0 = one per core, 1 = serial)
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Trace timestamp resolution in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub tick_ms: i64,

    /// Baseline client count replacing the stream model's
    #[arg(long)]
    pub clients: Option<usize>,

    /// Abort when more than this share of circuit builds fails
    #[arg(long, default_value_t = 0.05)]
    pub max_failure_rate: f64,

    /// Build two-hop circuits without a middle relay
    #[arg(long)]
    pub no_middle_hop: bool,

    /// Skip per-client invariant checks
    #[arg(long)]
    pub skip_invariants: bool,
}

impl RunArgs {
    /// Builds and validates the run configuration.
    ///
    /// # Errors
    ///
    /// - `ConfigError` - If the window or any numeric option is invalid
    pub fn to_config(&self) -> Result<SimulationConfig, ConfigError> {
        let mut config = SimulationConfig {
            seed: self.seed,
            window: TimeWindow::parse(&self.from, &self.to)?,
            load_scale: self.load_scale,
            clients: self.clients,
            tick: Duration::milliseconds(self.tick_ms),
            workers: self.workers,
            max_failure_rate: self.max_failure_rate,
            check_invariants: !self.skip_invariants,
            ..SimulationConfig::default()
        };
        config.path.middle_hop = !self.no_middle_hop;
        config.adversary.guards = AdversaryBudget::new(self.adv_guards_num, self.adv_guards_bw);
        config.adversary.exits = AdversaryBudget::new(self.adv_exits_num, self.adv_exits_bw);
        config.validate()?;
        Ok(config)
    }
}

/// Runs one simulation end to end.
///
/// # Errors
///
/// - `SimulationError` - Wrapped with the stage that failed
pub fn run(args: &RunArgs) -> anyhow::Result<RunReport> {
    let config = args.to_config().map_err(SimulationError::from)?;
    info!(window = %config.window, seed = config.seed, "Starting simulation");

    let catalog = load_inputs_catalog(&args.tor_data)?;
    let traffic = TrafficModel::load(&args.stream_model, &args.packet_model)
        .map_err(SimulationError::from)
        .context("loading traffic models")?;

    let scheduler = SimulationScheduler::new(&catalog, &traffic, config)?;
    info!(clients = scheduler.client_count(), "Client population sized");
    let report = scheduler
        .run_to_path(&args.output_trace)
        .with_context(|| format!("simulating into {}", args.output_trace.display()))?;

    info!(trace = %args.output_trace.display(), "Simulation finished");
    Ok(report)
}

fn load_inputs_catalog(dir: &Path) -> anyhow::Result<RelayCatalog> {
    let catalog = load_catalog(dir)
        .map_err(SimulationError::from)
        .with_context(|| format!("loading relay data from {}", dir.display()))?;
    let (from, to) = catalog.coverage();
    info!(
        epochs = catalog.epochs().len(),
        relays = catalog.distinct_relays(),
        %from,
        %to,
        "Relay dataset loaded"
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            tor_data: PathBuf::from("data"),
            from: "2024-01-01:00:00".to_string(),
            to: "2024-01-01:06:00".to_string(),
            stream_model: PathBuf::from("streams.json"),
            packet_model: PathBuf::from("packets.json"),
            output_trace: PathBuf::from("run.trace"),
            load_scale: 1.0,
            adv_guards_num: 5,
            adv_guards_bw: 0,
            adv_exits_num: 0,
            adv_exits_bw: 40_000,
            seed: 7,
            workers: 1,
            tick_ms: 1000,
            clients: None,
            max_failure_rate: 0.05,
            no_middle_hop: false,
            skip_invariants: false,
        }
    }

    #[test]
    fn test_args_map_to_config() {
        let config = args().to_config().unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.window.duration(), Duration::hours(6));
        assert_eq!(config.adversary.guards, AdversaryBudget::new(5, 0));
        assert_eq!(config.adversary.exits, AdversaryBudget::new(0, 40_000));
        assert!(config.path.middle_hop);
        assert!(config.check_invariants);
    }

    #[test]
    fn test_invalid_args_are_configuration_errors() {
        let reversed = RunArgs {
            from: "2024-01-01:06:00".to_string(),
            to: "2024-01-01:00:00".to_string(),
            ..args()
        };
        assert!(matches!(reversed.to_config(), Err(ConfigError::EmptyWindow { .. })));

        let scale = RunArgs {
            load_scale: 0.0,
            ..args()
        };
        assert!(matches!(scale.to_config(), Err(ConfigError::InvalidLoadScale { .. })));

        let tick = RunArgs { tick_ms: 0, ..args() };
        assert!(matches!(tick.to_config(), Err(ConfigError::InvalidTick { .. })));
    }
}
