//! Run driver: adversary selection, parallel client simulation and the
//! deterministic merge into a trace.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use onionsim_core::adversary::{AdversaryFootprint, AdversaryModel};
use onionsim_core::catalog::RelayCatalog;
use onionsim_core::config::{ConfigError, SimulationConfig};
use onionsim_core::path::PathSelector;
use onionsim_core::traffic::TrafficModel;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::SimulationError;
use crate::client::{ClientContext, ClientOutcome, ClientSimulation};
use crate::deterministic::{DeterministicRng, Draw, RUN_SCOPE, RunReport, SimClock, standard_invariants};
use crate::trace::{TraceError, TraceRecorder};

/// Drives a complete simulation run.
///
/// The catalog and traffic model are shared read-only by every client.
/// Clients run on a rayon pool and are collected in id order; their event
/// sequences are then merged into the trace, which is the only point where
/// client results meet.
#[derive(Debug)]
pub struct SimulationScheduler<'a> {
    catalog: &'a RelayCatalog,
    traffic: &'a TrafficModel,
    config: SimulationConfig,
    selector: PathSelector,
    clock: SimClock,
}

impl<'a> SimulationScheduler<'a> {
    /// Creates scheduler after validating the configuration against the catalog.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Config` - If a configuration parameter is invalid
    /// - `SimulationError::Catalog` - If the catalog does not cover the whole window
    pub fn new(
        catalog: &'a RelayCatalog,
        traffic: &'a TrafficModel,
        config: SimulationConfig,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        catalog.ensure_covers(config.window.from(), config.window.to())?;

        Ok(Self {
            catalog,
            traffic,
            selector: PathSelector::new(config.path.clone()),
            clock: SimClock::new(config.window, config.tick),
            config,
        })
    }

    /// Run configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Number of clients after load scaling.
    pub fn client_count(&self) -> usize {
        self.config.scaled_clients(self.traffic.streams().clients())
    }

    /// Selects the adversary footprint from the epoch containing the window start.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Catalog` - If no epoch covers the window start
    /// - `SimulationError::Adversary` - If a budget is infeasible
    pub fn select_adversary(&self) -> Result<AdversaryFootprint, SimulationError> {
        let epoch = self.catalog.epoch_for(self.config.window.from())?;
        let model = AdversaryModel::new(self.config.adversary.clone(), self.config.path.required_flags);
        let mut rng = DeterministicRng::substream(self.config.seed, RUN_SCOPE, Draw::Adversary);
        let footprint = model.select(epoch, &mut rng)?;

        info!(
            guards = footprint.guards().len(),
            guard_bandwidth = footprint.guard_bandwidth(),
            exits = footprint.exits().len(),
            exit_bandwidth = footprint.exit_bandwidth(),
            "Adversary footprint selected"
        );
        Ok(footprint)
    }

    /// Runs the simulation into a trace file at `path`.
    ///
    /// The adversary is selected before the output is opened, so an
    /// infeasible budget leaves no file behind. Opening the output removes
    /// any earlier trace at `path`, and any later failure leaves only the
    /// `.incomplete` file.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Config` - If the output cannot be created
    /// - `SimulationError` - Any error of [`SimulationScheduler::run_with`]
    pub fn run_to_path(&self, path: &Path) -> Result<RunReport, SimulationError> {
        let footprint = self.select_adversary()?;
        let recorder = TraceRecorder::create(path).map_err(|e| ConfigError::UnwritableOutput {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.run_with(&footprint, recorder)
    }

    /// Runs the simulation into an arbitrary writer.
    ///
    /// # Errors
    ///
    /// - `SimulationError` - Any error of [`SimulationScheduler::select_adversary`] or [`SimulationScheduler::run_with`]
    pub fn run_to_writer<W: Write>(&self, writer: W) -> Result<RunReport, SimulationError> {
        let footprint = self.select_adversary()?;
        self.run_with(&footprint, TraceRecorder::new(writer)?)
    }

    /// Simulates every client against `footprint` and seals the trace.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Catalog` - If a client reaches an instant without data
    /// - `SimulationError::Invariant` - If a client outcome breaks a run invariant
    /// - `SimulationError::FailureRateExceeded` - If too many circuit builds failed
    /// - `SimulationError::Trace` - If writing the trace fails
    /// - `SimulationError::WorkerPool` - If the worker pool cannot be built
    pub fn run_with<W: Write>(
        &self,
        footprint: &AdversaryFootprint,
        mut recorder: TraceRecorder<W>,
    ) -> Result<RunReport, SimulationError> {
        self.log_epochs();
        let outcomes = self.simulate_clients(footprint)?;

        if self.config.check_invariants {
            self.check_invariants(&outcomes)?;
        }

        let mut report = RunReport::new(self.config.seed, self.config.window, footprint);
        for outcome in &outcomes {
            report.record(outcome);
        }
        self.check_failure_rate(&report)?;

        merge(&outcomes, &mut recorder)?;
        let summary = recorder.finish(outcomes.len())?;
        info!(%summary, "Trace complete");
        info!("{}", report.summary());
        Ok(report)
    }

    /// Simulates all clients, returning outcomes in client-id order.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Config` - If the client count does not fit a client id
    /// - `SimulationError::Catalog` - If a client reaches an instant without data
    /// - `SimulationError::WorkerPool` - If the worker pool cannot be built
    pub fn simulate_clients(
        &self,
        footprint: &AdversaryFootprint,
    ) -> Result<Vec<ClientOutcome>, SimulationError> {
        let count = self.client_count();
        let clients = u32::try_from(count).map_err(|_| ConfigError::InvalidLoadScale {
            value: self.config.load_scale,
        })?;

        let ctx = ClientContext {
            catalog: self.catalog,
            traffic: self.traffic,
            selector: &self.selector,
            footprint,
            clock: self.clock,
            seed: self.config.seed,
            max_events: self.config.max_events_per_client,
        };
        let progress = Progress::new(count);
        let simulate = |client_id: u32| {
            let outcome = ClientSimulation::new(ctx, client_id).run();
            progress.advance();
            outcome
        };

        info!(
            clients = count,
            workers = self.config.workers,
            ticks = self.clock.tick_count(),
            "Simulating clients"
        );
        let outcomes: Result<Vec<ClientOutcome>, _> = if self.config.workers == 1 {
            (0..clients).map(&simulate).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
                .map_err(|e| SimulationError::WorkerPool {
                    reason: e.to_string(),
                })?;
            pool.install(|| (0..clients).into_par_iter().map(&simulate).collect())
        };
        Ok(outcomes?)
    }

    fn log_epochs(&self) {
        let window = &self.config.window;
        for epoch in self.catalog.epochs_between(window.from(), window.to()) {
            let stats = epoch.stats(self.config.path.required_flags);
            info!(
                valid_after = %epoch.valid_after(),
                relays = stats.relays,
                guards = stats.guards,
                exits = stats.exits,
                guard_bandwidth = stats.guard_bandwidth,
                exit_bandwidth = stats.exit_bandwidth,
                "Epoch relay population"
            );
        }
    }

    fn check_invariants(&self, outcomes: &[ClientOutcome]) -> Result<(), SimulationError> {
        let invariants = standard_invariants(self.catalog, self.clock);
        for outcome in outcomes {
            for invariant in &invariants {
                invariant.check(outcome)?;
            }
        }
        debug!(
            clients = outcomes.len(),
            invariants = invariants.len(),
            "Invariants hold"
        );
        Ok(())
    }

    fn check_failure_rate(&self, report: &RunReport) -> Result<(), SimulationError> {
        let totals = &report.totals;
        if totals.circuits_failed == 0 {
            return Ok(());
        }

        let rate = totals.failure_rate();
        warn!(
            failed = totals.circuits_failed,
            dropped_streams = totals.streams_dropped,
            rate,
            "Circuit builds failed"
        );
        if rate > self.config.max_failure_rate {
            return Err(SimulationError::FailureRateExceeded {
                failed: totals.circuits_failed,
                attempted: totals.circuits_built + totals.circuits_failed,
                rate,
                limit: self.config.max_failure_rate,
            });
        }
        Ok(())
    }
}

/// Writes all client events in total order.
fn merge<W: Write>(outcomes: &[ClientOutcome], recorder: &mut TraceRecorder<W>) -> Result<(), TraceError> {
    let mut heap = BinaryHeap::with_capacity(outcomes.len());
    for (client, outcome) in outcomes.iter().enumerate() {
        if let Some(event) = outcome.events.first() {
            heap.push(Reverse((event.key(), client, 0)));
        }
    }

    while let Some(Reverse((_, client, position))) = heap.pop() {
        let events = &outcomes[client].events;
        recorder.record(&events[position])?;
        if let Some(next) = events.get(position + 1) {
            heap.push(Reverse((next.key(), client, position + 1)));
        }
    }
    Ok(())
}

/// Logs client completion about every ten percent.
struct Progress {
    total: usize,
    step: usize,
    done: AtomicUsize,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            total,
            step: (total / 10).max(1),
            done: AtomicUsize::new(0),
        }
    }

    fn advance(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if done % self.step == 0 || done == self.total {
            info!(done, total = self.total, "Simulated {}% of clients", done * 100 / self.total);
        }
    }
}

#[cfg(test)]
mod tests;
