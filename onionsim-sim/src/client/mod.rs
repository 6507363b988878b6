//! Per-client discrete-event simulation.
//!
//! A client moves through `Created -> GuardAssigned -> Active -> Retired`.
//! It walks its sampled streams in start order, attaching each to a
//! reusable circuit or building a new one, and emits packets until the
//! stream's volume is spent or the client departs. Every random draw comes
//! from a sub-stream keyed by the run seed and the client id, so a client's
//! outcome does not depend on which worker simulates it.

use std::fmt;

use chrono::{DateTime, Utc};
use onionsim_core::adversary::{AdversaryFootprint, ObservationRecord};
use onionsim_core::catalog::{CatalogError, ConsensusEpoch, RelayCatalog};
use onionsim_core::path::{ExclusionLevel, GuardAssignment, PathSelector};
use onionsim_core::relay::RelayId;
use onionsim_core::traffic::{ClientSession, Direction, Stream, TrafficModel};
use tracing::{debug, warn};

use crate::deterministic::{
    CIRCUIT_INDEX_BITS, ClientMetrics, DeterministicRng, Draw, EventKind, SimClock, TraceEvent,
    TraceRecord, circuit_id,
};

/// Lifecycle phase of a simulated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Created,
    GuardAssigned,
    Active,
    Retired,
}

impl fmt::Display for ClientPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientPhase::Created => "created",
            ClientPhase::GuardAssigned => "guard_assigned",
            ClientPhase::Active => "active",
            ClientPhase::Retired => "retired",
        };
        f.write_str(name)
    }
}

/// A circuit built by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circuit {
    pub id: u64,
    pub guard: RelayId,
    pub middle: Option<RelayId>,
    pub exit: RelayId,
    /// Exclusion level the hops satisfy
    pub level: ExclusionLevel,
    pub created_at: DateTime<Utc>,
    /// End of the window in which new streams may attach
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub observation: ObservationRecord,
    /// Indices of the streams carried
    pub streams: Vec<u32>,
}

/// A stream attached to a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRecord {
    pub index: u32,
    pub circuit_id: u64,
    pub port: u16,
    pub start: DateTime<Utc>,
    pub bytes: u64,
}

/// Everything a client produced, with its events in trace order.
#[derive(Debug, Clone)]
pub struct ClientOutcome {
    pub client_id: u32,
    pub session: ClientSession,
    pub phase: ClientPhase,
    pub circuits: Vec<Circuit>,
    pub streams: Vec<StreamRecord>,
    pub events: Vec<TraceEvent>,
    pub metrics: ClientMetrics,
    /// Whether the event cap stopped the client early
    pub truncated: bool,
}

/// Read-only inputs shared by all clients of a run.
#[derive(Debug, Clone, Copy)]
pub struct ClientContext<'a> {
    pub catalog: &'a RelayCatalog,
    pub traffic: &'a TrafficModel,
    pub selector: &'a PathSelector,
    pub footprint: &'a AdversaryFootprint,
    pub clock: SimClock,
    pub seed: u64,
    pub max_events: usize,
}

/// Simulation state of one client.
pub struct ClientSimulation<'a> {
    ctx: ClientContext<'a>,
    client_id: u32,
    phase: ClientPhase,
    guard: Option<GuardAssignment>,
    guard_rng: DeterministicRng,
    path_rng: DeterministicRng,
    circuits: Vec<Circuit>,
    streams: Vec<StreamRecord>,
    events: Vec<TraceEvent>,
    metrics: ClientMetrics,
    truncated: bool,
}

impl<'a> ClientSimulation<'a> {
    /// Creates client `client_id` in the `Created` phase.
    pub fn new(ctx: ClientContext<'a>, client_id: u32) -> Self {
        let scope = u64::from(client_id);
        Self {
            ctx,
            client_id,
            phase: ClientPhase::Created,
            guard: None,
            guard_rng: DeterministicRng::substream(ctx.seed, scope, Draw::Guards),
            path_rng: DeterministicRng::substream(ctx.seed, scope, Draw::Paths),
            circuits: Vec::new(),
            streams: Vec::new(),
            events: Vec::new(),
            metrics: ClientMetrics::default(),
            truncated: false,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    /// Simulates the client from arrival to retirement.
    ///
    /// Selection failures are absorbed into the metrics: the affected stream
    /// is dropped and the client continues.
    ///
    /// # Errors
    ///
    /// - `CatalogError::DataUnavailable` - If a stream starts outside the catalog's coverage
    pub fn run(mut self) -> Result<ClientOutcome, CatalogError> {
        let ctx = self.ctx;
        let scope = u64::from(self.client_id);
        let mut session_rng = DeterministicRng::substream(ctx.seed, scope, Draw::Session);
        let session = ctx.traffic.sample_session(ctx.clock.window(), &mut session_rng);

        if session.arrival < session.departure {
            let epoch = ctx.catalog.epoch_for(session.arrival)?;
            self.ensure_guard(epoch, session.arrival);

            let stream_rng = DeterministicRng::substream(ctx.seed, scope, Draw::Streams);
            for stream in ctx
                .traffic
                .sample_streams(session.arrival, session.departure, stream_rng)
            {
                if self.events.len() >= ctx.max_events {
                    self.mark_truncated();
                    break;
                }
                self.attach_stream(&stream, session.departure)?;
                if self.truncated {
                    break;
                }
            }
        }

        Ok(self.retire(session))
    }

    fn attach_stream(&mut self, stream: &Stream, departure: DateTime<Utc>) -> Result<(), CatalogError> {
        let catalog = self.ctx.catalog;
        let epoch = catalog.epoch_for(stream.start)?;
        self.metrics.streams += 1;

        let slot = match self.reusable_circuit(stream.port, stream.start) {
            Some(slot) => {
                self.metrics.circuits_reused += 1;
                Some(slot)
            }
            None => self.build_circuit(epoch, stream),
        };
        let Some(slot) = slot else {
            self.metrics.streams_dropped += 1;
            return Ok(());
        };

        self.phase = ClientPhase::Active;
        let circuit_id = self.circuits[slot].id;
        self.circuits[slot].streams.push(stream.index);
        self.streams.push(StreamRecord {
            index: stream.index,
            circuit_id,
            port: stream.port,
            start: stream.start,
            bytes: stream.bytes,
        });
        let timestamp = self.ctx.clock.timestamp(stream.start);
        self.push(slot, timestamp, EventKind::StreamStarted, stream.bytes);
        self.emit_packets(slot, stream, departure);
        Ok(())
    }

    /// Keeps a usable guard, rotating it when expired, missing or ineligible.
    fn ensure_guard(&mut self, epoch: &ConsensusEpoch, now: DateTime<Utc>) -> bool {
        let selector = self.ctx.selector;
        if let Some(assignment) = &self.guard {
            let Some(reason) = assignment.rotation_reason(epoch, now, selector.config()) else {
                return true;
            };
            debug!(
                client = self.client_id,
                guard = %assignment.guard(),
                %reason,
                "Rotating guard"
            );
            self.metrics.guard_rotations += 1;
            self.guard = None;
        }

        match GuardAssignment::assign(selector, epoch, now, &mut self.guard_rng) {
            Ok(assignment) => {
                self.guard = Some(assignment);
                if self.phase == ClientPhase::Created {
                    self.phase = ClientPhase::GuardAssigned;
                }
                true
            }
            Err(e) => {
                debug!(client = self.client_id, "Guard assignment failed: {e}");
                false
            }
        }
    }

    /// Newest open circuit through the current guard whose exit allows `port`.
    fn reusable_circuit(&self, port: u16, now: DateTime<Utc>) -> Option<usize> {
        let guard = self.guard.as_ref()?.guard();
        self.circuits.iter().rposition(|circuit| {
            circuit.guard == guard && now < circuit.expires_at && self.exit_allows(circuit, port)
        })
    }

    fn exit_allows(&self, circuit: &Circuit, port: u16) -> bool {
        self.ctx
            .catalog
            .epoch_for(circuit.created_at)
            .ok()
            .and_then(|epoch| epoch.relay(circuit.exit))
            .is_some_and(|exit| exit.allows_port(port))
    }

    fn build_circuit(&mut self, epoch: &ConsensusEpoch, stream: &Stream) -> Option<usize> {
        let ctx = self.ctx;
        if !self.ensure_guard(epoch, stream.start) {
            self.metrics.circuits_failed += 1;
            return None;
        }
        let Some(guard) = self.guard.as_ref().and_then(|assignment| assignment.resolve(epoch)) else {
            self.metrics.circuits_failed += 1;
            return None;
        };

        let local_index = u32::try_from(self.circuits.len())
            .ok()
            .filter(|index| *index < 1 << CIRCUIT_INDEX_BITS);
        let Some(local_index) = local_index else {
            self.mark_truncated();
            return None;
        };

        let path = match ctx
            .selector
            .build_circuit(epoch, guard, stream.port, &mut self.path_rng)
        {
            Ok(path) => path,
            Err(e) => {
                debug!(client = self.client_id, port = stream.port, "Circuit build failed: {e}");
                self.metrics.circuits_failed += 1;
                return None;
            }
        };

        let observation = ctx.footprint.observe(path.guard, path.exit);
        self.metrics
            .record_circuit(observation, path.level != ExclusionLevel::Strict);

        let lifetime = ctx.selector.config().circuit_lifetime;
        self.circuits.push(Circuit {
            id: circuit_id(self.client_id, local_index),
            guard: path.guard,
            middle: path.middle,
            exit: path.exit,
            level: path.level,
            created_at: stream.start,
            expires_at: stream.start + lifetime,
            last_activity: stream.start,
            closed_at: stream.start,
            observation,
            streams: Vec::new(),
        });

        let slot = self.circuits.len() - 1;
        let timestamp = ctx.clock.timestamp(stream.start);
        self.push(slot, timestamp, EventKind::CircuitCreated, 0);
        Some(slot)
    }

    /// Emits the stream's packets before `until`, coalescing per tick and direction.
    fn emit_packets(&mut self, slot: usize, stream: &Stream, until: DateTime<Utc>) {
        let ctx = self.ctx;
        let rng = DeterministicRng::substream(
            ctx.seed,
            u64::from(self.client_id),
            Draw::Packets(stream.index),
        );
        let mut pending: Option<TickBytes> = None;

        for packet in ctx.traffic.sample_packets(stream, rng) {
            let Some(time) = stream.start.checked_add_signed(packet.offset) else {
                break;
            };
            if time >= until {
                break;
            }
            if self.events.len() >= ctx.max_events {
                self.mark_truncated();
                break;
            }

            self.metrics.packets += 1;
            self.metrics.bytes += packet.size;
            let circuit = &mut self.circuits[slot];
            circuit.last_activity = circuit.last_activity.max(time);

            let timestamp = ctx.clock.timestamp(time);
            if !pending.is_some_and(|bytes| bytes.timestamp == timestamp) {
                if let Some(done) = pending.take() {
                    self.flush(slot, done);
                }
                pending = Some(TickBytes::new(timestamp));
            }
            if let Some(bytes) = pending.as_mut() {
                bytes.add(packet.direction, packet.size);
            }
        }

        if let Some(done) = pending {
            self.flush(slot, done);
        }
    }

    fn flush(&mut self, slot: usize, bytes: TickBytes) {
        if bytes.outbound > 0 {
            self.push(slot, bytes.timestamp, EventKind::PacketOut, bytes.outbound);
        }
        if bytes.inbound > 0 {
            self.push(slot, bytes.timestamp, EventKind::PacketIn, bytes.inbound);
        }
    }

    fn push(&mut self, slot: usize, timestamp_ms: i64, kind: EventKind, size_bytes: u64) {
        let circuit = &self.circuits[slot];
        let record = TraceRecord {
            timestamp_ms,
            client_id: self.client_id,
            circuit_id: circuit.id,
            guard: circuit.guard,
            exit: circuit.exit,
            kind,
            size_bytes,
            observation: circuit.observation,
        };
        let seq = self.events.len() as u64;
        self.events.push(TraceEvent { record, seq });
    }

    fn mark_truncated(&mut self) {
        if !self.truncated {
            warn!(
                client = self.client_id,
                events = self.events.len(),
                "Client reached its event cap; remaining streams skipped"
            );
        }
        self.truncated = true;
    }

    /// Closes every circuit and orders the client's events.
    fn retire(mut self, session: ClientSession) -> ClientOutcome {
        let clock = self.ctx.clock;
        for slot in 0..self.circuits.len() {
            let circuit = &mut self.circuits[slot];
            let close = circuit
                .expires_at
                .max(circuit.last_activity)
                .min(session.departure);
            circuit.closed_at = clock.window().clamp(close);
            let timestamp = clock.timestamp(circuit.closed_at);
            self.push(slot, timestamp, EventKind::CircuitClosed, 0);
        }

        self.phase = ClientPhase::Retired;
        self.events.sort_unstable();

        ClientOutcome {
            client_id: self.client_id,
            session,
            phase: self.phase,
            circuits: self.circuits,
            streams: self.streams,
            events: self.events,
            metrics: self.metrics,
            truncated: self.truncated,
        }
    }
}

/// Packet bytes of one stream within one tick.
#[derive(Debug, Clone, Copy)]
struct TickBytes {
    timestamp: i64,
    outbound: u64,
    inbound: u64,
}

impl TickBytes {
    fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            outbound: 0,
            inbound: 0,
        }
    }

    fn add(&mut self, direction: Direction, size: u64) {
        match direction {
            Direction::Outbound => self.outbound += size,
            Direction::Inbound => self.inbound += size,
        }
    }
}

#[cfg(test)]
mod tests;
