//! Trace recording and reading.
//!
//! A trace is a header line, a column line, one line per event in total
//! order and a completion marker. Files are written under an
//! `.incomplete` name and renamed only once the marker is flushed, so an
//! interrupted run never leaves a file that looks finished.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Lines, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::deterministic::{EventKind, TraceEvent, TraceRecord};

/// First line of every trace.
pub const TRACE_HEADER: &str = "# onionsim trace v1";

/// Suffix of a trace that is still being written.
pub const INCOMPLETE_SUFFIX: &str = ".incomplete";

const COMPLETE_PREFIX: &str = "# complete ";

/// Errors from writing or reading traces.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    #[error("Failed to write trace {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Failed to read trace {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Malformed trace at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Trace event {index} breaks the total order")]
    OutOfOrder { index: u64 },
}

/// Path a trace occupies while being written.
pub fn incomplete_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(INCOMPLETE_SUFFIX);
    PathBuf::from(name)
}

/// Counts written in the completion marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceSummary {
    pub events: u64,
    pub clients: usize,
    pub circuits: u64,
}

impl fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} clients={} circuits={}",
            self.events, self.clients, self.circuits
        )
    }
}

impl FromStr for TraceSummary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut summary = TraceSummary::default();
        let mut seen = 0;
        for field in s.split_whitespace() {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| format!("invalid marker field '{field}'"))?;
            let invalid = |_| format!("invalid {key} count '{value}'");
            match key {
                "events" => summary.events = value.parse().map_err(invalid)?,
                "clients" => summary.clients = value.parse().map_err(invalid)?,
                "circuits" => summary.circuits = value.parse().map_err(invalid)?,
                _ => return Err(format!("unknown marker field '{key}'")),
            }
            seen += 1;
        }
        if seen != 3 {
            return Err("completion marker needs events, clients and circuits".to_string());
        }
        Ok(summary)
    }
}

/// Writes events in total order and seals the trace.
pub struct TraceRecorder<W: Write> {
    writer: BufWriter<W>,
    label: String,
    rename: Option<(PathBuf, PathBuf)>,
    events: u64,
    circuits: u64,
    last: Option<(i64, u32, u64, u64)>,
}

impl TraceRecorder<File> {
    /// Creates `<path>.incomplete`, removes any earlier trace at `path` and
    /// writes the header.
    ///
    /// # Errors
    ///
    /// - `TraceError::Write` - If the file cannot be created or written, or an earlier trace cannot be removed
    pub fn create(path: &Path) -> Result<Self, TraceError> {
        let partial = incomplete_path(path);
        let file = File::create(&partial).map_err(|e| TraceError::Write {
            path: partial.display().to_string(),
            reason: e.to_string(),
        })?;
        // a sealed trace from an earlier run must not outlive a failed rerun
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed earlier trace"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(TraceError::Write {
                    path: path.display().to_string(),
                    reason: format!("cannot remove earlier trace: {e}"),
                });
            }
        }
        debug!(path = %partial.display(), "Trace opened");
        Self::start(
            file,
            partial.display().to_string(),
            Some((partial, path.to_path_buf())),
        )
    }
}

impl<W: Write> TraceRecorder<W> {
    /// Creates recorder over an arbitrary writer and writes the header.
    ///
    /// # Errors
    ///
    /// - `TraceError::Write` - If the header cannot be written
    pub fn new(writer: W) -> Result<Self, TraceError> {
        Self::start(writer, "<writer>".to_string(), None)
    }

    fn start(writer: W, label: String, rename: Option<(PathBuf, PathBuf)>) -> Result<Self, TraceError> {
        let mut recorder = Self {
            writer: BufWriter::new(writer),
            label,
            rename,
            events: 0,
            circuits: 0,
            last: None,
        };
        recorder.write_line(format_args!("{TRACE_HEADER}"))?;
        recorder.write_line(format_args!("{}", TraceRecord::COLUMNS))?;
        Ok(recorder)
    }

    /// Number of events written so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Appends one event.
    ///
    /// # Errors
    ///
    /// - `TraceError::OutOfOrder` - If the event does not sort after the previous one
    /// - `TraceError::Write` - If writing fails
    pub fn record(&mut self, event: &TraceEvent) -> Result<(), TraceError> {
        let key = event.key();
        if self.last.is_some_and(|last| last >= key) {
            return Err(TraceError::OutOfOrder { index: self.events });
        }
        self.last = Some(key);

        self.write_line(format_args!("{}", event.record))?;
        self.events += 1;
        if event.record.kind == EventKind::CircuitCreated {
            self.circuits += 1;
        }
        Ok(())
    }

    /// Writes the completion marker, flushes and moves the file into place.
    ///
    /// # Errors
    ///
    /// - `TraceError::Write` - If the marker cannot be written, flushed or renamed
    pub fn finish(mut self, clients: usize) -> Result<TraceSummary, TraceError> {
        let summary = TraceSummary {
            events: self.events,
            clients,
            circuits: self.circuits,
        };
        self.write_line(format_args!("{COMPLETE_PREFIX}{summary}"))?;
        self.writer.flush().map_err(|e| self.write_error(e))?;

        let Self {
            writer,
            label,
            rename,
            ..
        } = self;
        drop(writer);

        if let Some((partial, path)) = rename {
            fs::rename(&partial, &path).map_err(|e| TraceError::Write {
                path: label,
                reason: format!("cannot rename to {}: {e}", path.display()),
            })?;
            debug!(path = %path.display(), %summary, "Trace sealed");
        }
        Ok(summary)
    }

    fn write_line(&mut self, line: fmt::Arguments<'_>) -> Result<(), TraceError> {
        writeln!(self.writer, "{line}").map_err(|e| self.write_error(e))
    }

    fn write_error(&self, error: std::io::Error) -> TraceError {
        TraceError::Write {
            path: self.label.clone(),
            reason: error.to_string(),
        }
    }
}

/// A parsed trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFile {
    pub records: Vec<TraceRecord>,
    /// Completion marker, when present
    pub summary: Option<TraceSummary>,
}

impl TraceFile {
    /// Checks for a marker whose event count matches the records.
    pub fn is_complete(&self) -> bool {
        self.summary
            .is_some_and(|summary| summary.events == self.records.len() as u64)
    }

    /// Total packet bytes in the trace.
    pub fn packet_bytes(&self) -> u64 {
        self.records
            .iter()
            .filter(|record| record.kind.is_packet())
            .map(|record| record.size_bytes)
            .sum()
    }
}

/// Streams records out of a trace.
pub struct TraceReader<R> {
    lines: Lines<R>,
    line: usize,
    summary: Option<TraceSummary>,
}

impl TraceReader<BufReader<File>> {
    /// Opens a trace file.
    ///
    /// # Errors
    ///
    /// - `TraceError::Read` - If the file cannot be opened
    /// - `TraceError::Malformed` - If the header lines are wrong
    pub fn open(path: &Path) -> Result<Self, TraceError> {
        let file = File::open(path).map_err(|e| TraceError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::new(BufReader::new(file))
    }
}

impl<R: BufRead> TraceReader<R> {
    /// Creates reader and checks the header lines.
    ///
    /// # Errors
    ///
    /// - `TraceError::Malformed` - If the header or column line is missing or wrong
    pub fn new(reader: R) -> Result<Self, TraceError> {
        let mut trace = Self {
            lines: reader.lines(),
            line: 0,
            summary: None,
        };
        for expected in [TRACE_HEADER, TraceRecord::COLUMNS] {
            let found = trace.next_line()?;
            if found.as_deref() != Some(expected) {
                return Err(TraceError::Malformed {
                    line: trace.line,
                    reason: format!("expected '{expected}'"),
                });
            }
        }
        Ok(trace)
    }

    /// Completion marker seen so far.
    pub fn summary(&self) -> Option<TraceSummary> {
        self.summary
    }

    /// Reads every remaining record.
    ///
    /// # Errors
    ///
    /// - `TraceError` - On the first unreadable or malformed line
    pub fn read_all(mut self) -> Result<TraceFile, TraceError> {
        let mut records = Vec::new();
        for record in self.by_ref() {
            records.push(record?);
        }
        Ok(TraceFile {
            records,
            summary: self.summary,
        })
    }

    fn next_line(&mut self) -> Result<Option<String>, TraceError> {
        self.line += 1;
        match self.lines.next() {
            None => Ok(None),
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(TraceError::Read {
                path: format!("line {}", self.line),
                reason: e.to_string(),
            }),
        }
    }

    fn malformed(&self, reason: String) -> TraceError {
        TraceError::Malformed {
            line: self.line,
            reason,
        }
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceRecord, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.next_line() {
            Ok(line) => line?,
            Err(e) => return Some(Err(e)),
        };

        if self.summary.is_some() {
            return Some(Err(self.malformed("content after completion marker".to_string())));
        }
        if let Some(marker) = line.strip_prefix(COMPLETE_PREFIX) {
            return match marker.parse() {
                Ok(summary) => {
                    self.summary = Some(summary);
                    self.next()
                }
                Err(reason) => Some(Err(self.malformed(reason))),
            };
        }
        Some(TraceRecord::parse_line(&line).map_err(|reason| self.malformed(reason)))
    }
}

#[cfg(test)]
mod tests;
