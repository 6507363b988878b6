//! Trace events and their total order.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use onionsim_core::adversary::ObservationRecord;
use onionsim_core::relay::RelayId;

/// Bits of a circuit id holding the client-local circuit index.
pub const CIRCUIT_INDEX_BITS: u32 = 24;

/// Builds the globally unique id of a client's `local_index`th circuit.
pub fn circuit_id(client_id: u32, local_index: u32) -> u64 {
    (u64::from(client_id) << CIRCUIT_INDEX_BITS) | u64::from(local_index)
}

/// Types of events recorded in a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    CircuitCreated,
    StreamStarted,
    PacketOut,
    PacketIn,
    CircuitClosed,
}

impl EventKind {
    /// All kinds in trace order of first appearance on a circuit.
    pub const ALL: [EventKind; 5] = [
        EventKind::CircuitCreated,
        EventKind::StreamStarted,
        EventKind::PacketOut,
        EventKind::PacketIn,
        EventKind::CircuitClosed,
    ];

    /// Returns the trace spelling of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CircuitCreated => "circuit_created",
            EventKind::StreamStarted => "stream_started",
            EventKind::PacketOut => "packet_out",
            EventKind::PacketIn => "packet_in",
            EventKind::CircuitClosed => "circuit_closed",
        }
    }

    /// Checks whether this kind carries packet bytes.
    pub fn is_packet(self) -> bool {
        matches!(self, EventKind::PacketOut | EventKind::PacketIn)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

/// One line of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    /// Unix milliseconds, quantized to the tick
    pub timestamp_ms: i64,
    pub client_id: u32,
    pub circuit_id: u64,
    pub guard: RelayId,
    pub exit: RelayId,
    pub kind: EventKind,
    /// Packet bytes, stream volume for stream starts, zero otherwise
    pub size_bytes: u64,
    pub observation: ObservationRecord,
}

impl TraceRecord {
    /// Column names, in line order.
    pub const COLUMNS: &'static str = "timestamp_ms,client_id,circuit_id,guard_id,exit_id,event_type,size_bytes,guard_compromised,exit_compromised";

    /// Parses a record line.
    ///
    /// # Errors
    ///
    /// - `String` - Describing the first field that fails to parse
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 9 {
            return Err(format!("expected 9 fields, found {}", fields.len()));
        }

        fn number<T: FromStr>(name: &str, value: &str) -> Result<T, String> {
            value
                .parse()
                .map_err(|_| format!("invalid {name} '{value}'"))
        }

        Ok(Self {
            timestamp_ms: number("timestamp_ms", fields[0])?,
            client_id: number("client_id", fields[1])?,
            circuit_id: number("circuit_id", fields[2])?,
            guard: RelayId::new(number("guard_id", fields[3])?),
            exit: RelayId::new(number("exit_id", fields[4])?),
            kind: fields[5].parse()?,
            size_bytes: number("size_bytes", fields[6])?,
            observation: ObservationRecord {
                guard_compromised: number("guard_compromised", fields[7])?,
                exit_compromised: number("exit_compromised", fields[8])?,
            },
        })
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{},{},{}",
            self.timestamp_ms,
            self.client_id,
            self.circuit_id,
            self.guard,
            self.exit,
            self.kind,
            self.size_bytes,
            self.observation.guard_compromised,
            self.observation.exit_compromised
        )
    }
}

/// A record with its per-client sequence number.
///
/// Events order by timestamp, then client id, then circuit id, then
/// sequence number. The order is total because sequence numbers are unique
/// within a client.
#[derive(Debug, Clone, Copy)]
pub struct TraceEvent {
    pub record: TraceRecord,
    /// Emission order within the client
    pub seq: u64,
}

impl TraceEvent {
    /// Sort key of this event.
    pub fn key(&self) -> (i64, u32, u64, u64) {
        (
            self.record.timestamp_ms,
            self.record.client_id,
            self.record.circuit_id,
            self.seq,
        )
    }
}

impl Eq for TraceEvent {}

impl PartialEq for TraceEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Ord for TraceEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for TraceEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
