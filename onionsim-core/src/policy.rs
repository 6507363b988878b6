//! Exit policy summaries.
//!
//! Parses the compact `accept 80,443` / `reject 25,119` port summaries that
//! Tor publishes for exit relays and answers whether a destination port is
//! permitted.

use std::fmt;
use std::str::FromStr;

/// Errors from parsing an exit policy summary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyParseError {
    #[error("Unknown exit policy action: {action}")]
    UnknownAction { action: String },

    #[error("Invalid port range in exit policy: {range}")]
    InvalidRange { range: String },
}

/// Whether the listed ports are the accepted or the rejected ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    Accept,
    Reject,
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Creates an inclusive range, returning `None` when `start > end` or
    /// `start` is zero.
    pub fn new(start: u16, end: u16) -> Option<Self> {
        (start > 0 && start <= end).then_some(Self { start, end })
    }

    /// Checks whether `port` lies within the range.
    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Port-based exit policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPolicy {
    action: PolicyAction,
    ranges: Vec<PortRange>,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self::reject_all()
    }
}

impl ExitPolicy {
    /// Creates policy from an action and port ranges.
    ///
    /// Ranges are sorted and overlapping or adjacent ranges merged.
    pub fn new(action: PolicyAction, ranges: impl IntoIterator<Item = PortRange>) -> Self {
        let mut ranges: Vec<PortRange> = ranges.into_iter().collect();
        ranges.sort();

        let mut merged: Vec<PortRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if u32::from(range.start) <= u32::from(last.end) + 1 => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }

        Self {
            action,
            ranges: merged,
        }
    }

    /// Policy allowing no destination port.
    pub fn reject_all() -> Self {
        Self {
            action: PolicyAction::Accept,
            ranges: Vec::new(),
        }
    }

    /// Policy allowing every destination port.
    pub fn accept_all() -> Self {
        Self {
            action: PolicyAction::Reject,
            ranges: Vec::new(),
        }
    }

    /// Policy accepting exactly `ports`.
    pub fn accept_ports(ports: &[u16]) -> Self {
        Self::new(
            PolicyAction::Accept,
            ports.iter().filter_map(|port| PortRange::new(*port, *port)),
        )
    }

    /// Checks whether connecting to `port` is permitted.
    pub fn allows(&self, port: u16) -> bool {
        let listed = self.ranges.iter().any(|range| range.contains(port));
        match self.action {
            PolicyAction::Accept => listed,
            PolicyAction::Reject => !listed && port != 0,
        }
    }

    /// Checks whether at least one port is permitted.
    pub fn allows_any(&self) -> bool {
        match self.action {
            PolicyAction::Accept => !self.ranges.is_empty(),
            PolicyAction::Reject => {
                self.ranges.first().map(|r| r.start > 1).unwrap_or(true)
                    || self.ranges.last().map(|r| r.end < u16::MAX).unwrap_or(true)
                    || self.ranges.windows(2).any(|w| w[1].start > w[0].end + 1)
            }
        }
    }
}

impl FromStr for ExitPolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::reject_all());
        }

        let (action, list) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
        let action = match action {
            "accept" => PolicyAction::Accept,
            "reject" => PolicyAction::Reject,
            other => {
                return Err(PolicyParseError::UnknownAction {
                    action: other.to_string(),
                });
            }
        };

        let mut ranges = Vec::new();
        for item in list.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            ranges.push(parse_range(item)?);
        }

        Ok(Self::new(action, ranges))
    }
}

fn parse_range(item: &str) -> Result<PortRange, PolicyParseError> {
    let invalid = || PolicyParseError::InvalidRange {
        range: item.to_string(),
    };

    let (start, end) = match item.split_once('-') {
        Some((start, end)) => (start, end),
        None => (item, item),
    };
    let start: u16 = start.trim().parse().map_err(|_| invalid())?;
    let end: u16 = end.trim().parse().map_err(|_| invalid())?;

    PortRange::new(start, end).ok_or_else(invalid)
}

impl fmt::Display for ExitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            PolicyAction::Accept => "accept",
            PolicyAction::Reject => "reject",
        };
        let ranges: Vec<String> = self.ranges.iter().map(PortRange::to_string).collect();
        write!(f, "{action} {}", ranges.join(","))
    }
}
