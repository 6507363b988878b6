//! Simulation time window and tick quantization.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::config::ConfigError;

/// Format of window boundaries on the command line.
pub const TIME_FORMAT: &str = "%Y-%m-%d:%H:%M";

/// Upper bound for any sampled duration, roughly a century.
pub const MAX_DURATION_SECS: f64 = 3.2e9;

// 2024-01-01T00:00:00Z
const DEFAULT_WINDOW_START: i64 = 1_704_067_200;

/// Parses a `YYYY-MM-DD:HH:MM` timestamp as UTC.
///
/// # Errors
///
/// - `ConfigError::InvalidTime` - If the value does not match the format
pub fn parse_time(value: &str) -> Result<DateTime<Utc>, ConfigError> {
    NaiveDateTime::parse_from_str(value.trim(), TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| ConfigError::InvalidTime {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Half-open simulated time range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl Default for TimeWindow {
    fn default() -> Self {
        let from = DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(DEFAULT_WINDOW_START);
        Self {
            from,
            to: from + Duration::hours(1),
        }
    }
}

impl TimeWindow {
    /// Creates window, requiring `from < to`.
    ///
    /// # Errors
    ///
    /// - `ConfigError::EmptyWindow` - If `from` is not before `to`
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, ConfigError> {
        if from >= to {
            return Err(ConfigError::EmptyWindow { from, to });
        }
        Ok(Self { from, to })
    }

    /// Parses both boundaries in [`TIME_FORMAT`].
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidTime` - If either boundary is malformed
    /// - `ConfigError::EmptyWindow` - If `from` is not before `to`
    pub fn parse(from: &str, to: &str) -> Result<Self, ConfigError> {
        Self::new(parse_time(from)?, parse_time(to)?)
    }

    /// Inclusive start.
    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    /// Exclusive end.
    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    /// Length of the window.
    pub fn duration(&self) -> Duration {
        self.to - self.from
    }

    /// Checks whether `time` lies inside the window.
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.from <= time && time < self.to
    }

    /// Clamps `time` to the last instant strictly before `to`.
    pub fn clamp(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let last = (self.to - Duration::milliseconds(1)).max(self.from);
        time.clamp(self.from, last)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.from.format(TIME_FORMAT),
            self.to.format(TIME_FORMAT)
        )
    }
}

/// Quantizes `time` down to a multiple of `tick` counted from the Unix epoch.
///
/// Non-positive ticks leave the time at millisecond precision.
pub fn quantize_millis(time: DateTime<Utc>, tick: Duration) -> i64 {
    let millis = time.timestamp_millis();
    let tick = tick.num_milliseconds();
    if tick <= 1 {
        return millis;
    }
    millis.div_euclid(tick) * tick
}

/// Converts fractional seconds to a duration with millisecond resolution.
///
/// Negative and non-finite values become zero; values are capped at
/// [`MAX_DURATION_SECS`].
pub fn duration_from_secs(secs: f64) -> Duration {
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::zero();
    }
    let millis = secs.min(MAX_DURATION_SECS) * 1000.0;
    Duration::milliseconds(millis as i64)
}
