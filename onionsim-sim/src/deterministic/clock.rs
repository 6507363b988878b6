//! Simulated time and seeded random sub-streams.

use chrono::{DateTime, Duration, Utc};
use onionsim_core::time::{TimeWindow, quantize_millis};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Pseudo-client id reserved for run-wide draws such as the adversary.
pub const RUN_SCOPE: u64 = u64::MAX;

/// Simulation clock over a fixed window.
///
/// Maps simulated instants to trace timestamps by quantizing them down to
/// the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimClock {
    window: TimeWindow,
    tick: Duration,
}

impl SimClock {
    /// Creates clock for `window` with resolution `tick`.
    pub fn new(window: TimeWindow, tick: Duration) -> Self {
        Self { window, tick }
    }

    /// Simulated window.
    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Timestamp resolution.
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Trace timestamp of `time` in Unix milliseconds.
    pub fn timestamp(&self, time: DateTime<Utc>) -> i64 {
        quantize_millis(time, self.tick)
    }

    /// First trace timestamp of the window.
    pub fn start_millis(&self) -> i64 {
        self.timestamp(self.window.from())
    }

    /// Exclusive upper bound of trace timestamps.
    pub fn end_millis(&self) -> i64 {
        self.window.to().timestamp_millis()
    }

    /// Upper bound on the number of ticks in the window.
    pub fn tick_count(&self) -> i64 {
        let tick = self.tick.num_milliseconds().max(1);
        (self.end_millis() - self.start_millis() + tick - 1) / tick
    }
}

/// Purpose of a random sub-stream within one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Draw {
    /// Arrival and departure
    Session,
    /// Guard choice and lifetimes
    Guards,
    /// Middle and exit choice for every circuit
    Paths,
    /// Stream arrivals, ports and volumes
    Streams,
    /// Packets of the stream with the given index
    Packets(u32),
    /// Adversary footprint, under [`RUN_SCOPE`]
    Adversary,
}

impl Draw {
    fn stream_number(self) -> u64 {
        match self {
            Draw::Session => 0,
            Draw::Guards => 1,
            Draw::Paths => 2,
            Draw::Streams => 3,
            Draw::Adversary => 4,
            Draw::Packets(index) => (1 << 32) | u64::from(index),
        }
    }
}

/// Deterministic random number generator for reproducible simulations.
///
/// Each generator is an independent ChaCha8 stream keyed by the run seed
/// and a scope (normally the client id), with the draw purpose selecting
/// the stream number. Outputs never depend on which worker runs a client.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
    seed: u64,
}

impl DeterministicRng {
    /// Creates deterministic RNG from seed value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// Creates the sub-stream for `draw` of `scope` within run `run_seed`.
    pub fn substream(run_seed: u64, scope: u64, draw: Draw) -> Self {
        let seed = mix(run_seed ^ mix(scope));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(draw.stream_number());
        Self { rng, seed }
    }

    /// Returns the derived seed of this generator.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RngCore for DeterministicRng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }
}

// splitmix64 finalizer
fn mix(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
