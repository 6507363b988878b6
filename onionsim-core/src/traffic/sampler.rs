//! Lazy stream and packet sampling.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use super::ModelError;
use super::packet_model::PacketModel;
use super::stream_model::StreamModel;
use crate::time::TimeWindow;

/// A client request to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    /// Position of the stream among its client's streams
    pub index: u32,
    pub start: DateTime<Utc>,
    pub port: u16,
    /// Sampled volume, both directions
    pub bytes: u64,
}

/// Packet direction relative to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => f.write_str("out"),
            Direction::Inbound => f.write_str("in"),
        }
    }
}

/// A packet of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    /// Offset from the stream start
    pub offset: Duration,
    pub direction: Direction,
    pub size: u64,
}

/// Interval during which a client is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSession {
    pub arrival: DateTime<Utc>,
    pub departure: DateTime<Utc>,
}

/// Stream and packet models combined.
#[derive(Debug, Clone)]
pub struct TrafficModel {
    streams: StreamModel,
    packets: PacketModel,
}

impl TrafficModel {
    /// Combines validated stream and packet models.
    pub fn new(streams: StreamModel, packets: PacketModel) -> Self {
        Self { streams, packets }
    }

    /// Loads both model files.
    ///
    /// # Errors
    ///
    /// - `ModelError` - If either file is unreadable, malformed or invalid
    pub fn load(stream_model: &Path, packet_model: &Path) -> Result<Self, ModelError> {
        Ok(Self::new(
            StreamModel::load(stream_model)?,
            PacketModel::load(packet_model)?,
        ))
    }

    /// Stream-level model.
    pub fn streams(&self) -> &StreamModel {
        &self.streams
    }

    /// Packet-level model.
    pub fn packets(&self) -> &PacketModel {
        &self.packets
    }

    /// Samples when a client arrives and leaves within `window`.
    pub fn sample_session<R: Rng + ?Sized>(&self, window: &TimeWindow, rng: &mut R) -> ClientSession {
        let spread = self.streams.arrival_spread().num_milliseconds();
        let delay = if spread > 0 {
            rng.random_range(0..=spread)
        } else {
            0
        };
        let arrival = window.clamp(window.from() + Duration::milliseconds(delay));

        let departure = self
            .streams
            .sample_session_length(rng)
            .and_then(|length| arrival.checked_add_signed(length))
            .map_or(window.to(), |departure| departure.min(window.to()));

        ClientSession { arrival, departure }
    }

    /// Lazily samples streams starting in `[from, until)`.
    ///
    /// The sampler owns `rng`; the sequence is finite because every gap is
    /// at least one millisecond.
    pub fn sample_streams<R: Rng>(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        rng: R,
    ) -> StreamSampler<'_, R> {
        StreamSampler {
            model: &self.streams,
            rng,
            next_start: Some(from),
            gap_pending: true,
            until,
            index: 0,
        }
    }

    /// Lazily samples the packets of `stream`.
    ///
    /// Packets stop when the stream's volume is spent, a terminal state is
    /// reached or the packet cap is hit. The last packet is truncated to the
    /// remaining volume.
    pub fn sample_packets<R: Rng>(&self, stream: &Stream, mut rng: R) -> PacketSampler<'_, R> {
        let state = self.packets.initial_state(stream.port, &mut rng);
        PacketSampler {
            model: &self.packets,
            rng,
            state: Some(state),
            remaining: stream.bytes,
            emitted: 0,
            offset: Duration::zero(),
        }
    }
}

/// Iterator over a client's streams.
#[derive(Debug)]
pub struct StreamSampler<'m, R> {
    model: &'m StreamModel,
    rng: R,
    next_start: Option<DateTime<Utc>>,
    gap_pending: bool,
    until: DateTime<Utc>,
    index: u32,
}

impl<R: Rng> Iterator for StreamSampler<'_, R> {
    type Item = Stream;

    fn next(&mut self) -> Option<Stream> {
        let mut start = self.next_start?;
        if self.gap_pending {
            self.gap_pending = false;
            start = start.checked_add_signed(self.model.sample_gap(&mut self.rng))?;
        }
        if start >= self.until {
            self.next_start = None;
            return None;
        }

        let port = self.model.sample_port(&mut self.rng);
        let bytes = self.model.sample_bytes(&mut self.rng);
        let gap = self.model.sample_gap(&mut self.rng);
        self.next_start = start.checked_add_signed(gap);

        let stream = Stream {
            index: self.index,
            start,
            port,
            bytes,
        };
        self.index += 1;
        Some(stream)
    }
}

/// Iterator over a stream's packets.
#[derive(Debug)]
pub struct PacketSampler<'m, R> {
    model: &'m PacketModel,
    rng: R,
    state: Option<usize>,
    remaining: u64,
    emitted: usize,
    offset: Duration,
}

impl<R: Rng> Iterator for PacketSampler<'_, R> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if self.remaining == 0 || self.emitted >= self.model.max_packets_per_stream() {
            return None;
        }
        let state = self.state?;

        let (outbound, size, delay, next) = self.model.step(state, &mut self.rng);
        let size = size.min(self.remaining);
        self.remaining -= size;

        let packet = Packet {
            offset: self.offset,
            direction: if outbound {
                Direction::Outbound
            } else {
                Direction::Inbound
            },
            size,
        };

        self.offset += delay;
        self.state = next;
        self.emitted += 1;
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    const STREAMS: &str = r#"{
        "clients": 10,
        "inter_arrival_secs": { "type": "exponential", "rate": 0.1 },
        "ports": [ { "port": 443, "weight": 1.0 } ],
        "bytes": { "type": "constant", "value": 10000 },
        "session": { "arrival_spread_secs": 600, "duration_secs": { "type": "constant", "value": 1800 } }
    }"#;

    const PACKETS: &str = r#"{
        "initial": [ { "state": "chat", "weight": 1.0 } ],
        "states": {
            "chat": { "outbound_probability": 0.5, "size_bytes": {"type":"constant","value":1500},
                      "delay_secs": {"type":"constant","value":0.5},
                      "transitions": [ { "state": "chat", "weight": 1.0 } ] }
        },
        "max_packets_per_stream": 5
    }"#;

    fn model() -> TrafficModel {
        TrafficModel::new(
            StreamModel::from_json(STREAMS).unwrap(),
            PacketModel::from_json(PACKETS).unwrap(),
        )
    }

    fn window() -> TimeWindow {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TimeWindow::new(from, from + Duration::hours(1)).unwrap()
    }

    #[test]
    fn test_streams_are_bounded_and_ordered() {
        let model = model();
        let window = window();
        let streams: Vec<Stream> = model
            .sample_streams(window.from(), window.to(), ChaCha8Rng::seed_from_u64(1))
            .collect();

        assert!(!streams.is_empty());
        for (index, pair) in streams.windows(2).enumerate() {
            assert!(pair[0].start <= pair[1].start);
            assert_eq!(pair[0].index as usize, index);
        }
        assert!(streams.iter().all(|stream| window.contains(stream.start)));
        assert!(streams.iter().all(|stream| stream.port == 443 && stream.bytes == 10_000));
    }

    #[test]
    fn test_stream_sampling_is_reproducible() {
        let model = model();
        let window = window();
        let first: Vec<Stream> = model
            .sample_streams(window.from(), window.to(), ChaCha8Rng::seed_from_u64(9))
            .collect();
        let second: Vec<Stream> = model
            .sample_streams(window.from(), window.to(), ChaCha8Rng::seed_from_u64(9))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_packets_respect_volume_and_cap() {
        let model = model();
        let stream = Stream {
            index: 0,
            start: window().from(),
            port: 443,
            bytes: 4000,
        };

        let packets: Vec<Packet> = model
            .sample_packets(&stream, ChaCha8Rng::seed_from_u64(3))
            .collect();
        let sizes: Vec<u64> = packets.iter().map(|packet| packet.size).collect();
        assert_eq!(sizes, vec![1500, 1500, 1000]);
        assert_eq!(packets[2].offset, Duration::seconds(1));

        let large = Stream { bytes: 1_000_000, ..stream };
        let capped = model.sample_packets(&large, ChaCha8Rng::seed_from_u64(3)).count();
        assert_eq!(capped, 5);
    }

    #[test]
    fn test_session_within_window() {
        let model = model();
        let window = window();
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        for _ in 0..200 {
            let session = model.sample_session(&window, &mut rng);
            assert!(session.arrival >= window.from());
            assert!(session.arrival <= window.from() + Duration::minutes(10));
            assert_eq!(session.departure, session.arrival + Duration::minutes(30));
        }
    }
}
