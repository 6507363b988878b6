//! JSON consensus dataset adapter.
//!
//! A dataset is a directory of `*.json` consensus snapshots. Relay
//! fingerprints are mapped to compact [`RelayId`]s in order of first
//! appearance across the time-sorted snapshots, so identifiers are stable
//! for a given dataset.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::catalog::{CatalogError, ConsensusEpoch, PositionWeights, RelayCatalog};
use crate::policy::{ExitPolicy, PolicyParseError};
use crate::relay::{Flag, Relay, RelayFlags, RelayId};

/// Errors from reading a consensus dataset.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Dataset directory {path} contains no consensus files")]
    NoConsensusFiles { path: String },

    #[error("Failed to parse consensus {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Invalid relay fingerprint '{fingerprint}' in {path}")]
    InvalidFingerprint { path: String, fingerprint: String },

    #[error("Invalid exit policy of relay {fingerprint} in {path}: {source}")]
    InvalidPolicy {
        path: String,
        fingerprint: String,
        source: PolicyParseError,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// One consensus snapshot as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDocument {
    pub valid_after: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Tor `bandwidth-weights`, scaled by 10000
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_weights: Option<BTreeMap<String, i64>>,
    pub relays: Vec<RelayDocument>,
}

/// One relay entry of a consensus snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayDocument {
    pub fingerprint: String,
    #[serde(default)]
    pub nickname: String,
    pub address: IpAddr,
    pub bandwidth: u64,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub family: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_policy: Option<String>,
}

/// Assigns compact identifiers to fingerprints.
#[derive(Debug, Default)]
pub struct RelayIdAllocator {
    ids: HashMap<String, RelayId>,
}

impl RelayIdAllocator {
    /// Returns the identifier of `fingerprint`, assigning the next free one if new.
    pub fn assign(&mut self, fingerprint: &str) -> RelayId {
        let next = RelayId::new(self.ids.len() as u32);
        *self.ids.entry(fingerprint.to_string()).or_insert(next)
    }

    /// Identifier of an already known fingerprint.
    pub fn lookup(&self, fingerprint: &str) -> Option<RelayId> {
        self.ids.get(fingerprint).copied()
    }

    /// Number of assigned identifiers.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Checks whether no identifier was assigned.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Normalizes a fingerprint to 40 uppercase hex digits.
///
/// Accepts the `$` prefix and `=nick`/`~nick` suffix used in family lines.
///
/// # Errors
///
/// - `String` - With the offending input if it is not 20 bytes of hex
pub fn normalize_fingerprint(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().trim_start_matches('$');
    let trimmed = trimmed.split(['=', '~']).next().unwrap_or(trimmed);
    match hex::decode(trimmed) {
        Ok(bytes) if bytes.len() == 20 => Ok(hex::encode_upper(bytes)),
        _ => Err(raw.to_string()),
    }
}

/// Loads every `*.json` consensus in `dir` into a catalog.
///
/// # Errors
///
/// - `DatasetError::Unreadable` - If the directory or a file cannot be read
/// - `DatasetError::NoConsensusFiles` - If the directory holds no consensus
/// - `DatasetError::Malformed` - If a file is not a valid consensus document
/// - `DatasetError::InvalidFingerprint` - If a relay fingerprint is not 20 bytes of hex
/// - `DatasetError::InvalidPolicy` - If an exit policy cannot be parsed
/// - `DatasetError::Catalog` - If epochs overlap or have empty validity
pub fn load_catalog(dir: &Path) -> Result<RelayCatalog, DatasetError> {
    let unreadable = |e: std::io::Error| DatasetError::Unreadable {
        path: dir.display().to_string(),
        reason: e.to_string(),
    };

    let mut files: Vec<_> = fs::read_dir(dir)
        .map_err(unreadable)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(unreadable)?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(DatasetError::NoConsensusFiles {
            path: dir.display().to_string(),
        });
    }

    let mut documents = Vec::with_capacity(files.len());
    for file in &files {
        let path = file.display().to_string();
        let text = fs::read_to_string(file).map_err(|e| DatasetError::Unreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let document: ConsensusDocument =
            serde_json::from_str(&text).map_err(|e| DatasetError::Malformed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        debug!(
            file = %path,
            relays = document.relays.len(),
            valid_after = %document.valid_after,
            "Loaded consensus"
        );
        documents.push((path, document));
    }

    let catalog = catalog_from_documents(documents)?;
    let (start, end) = catalog.coverage();
    info!(
        epochs = catalog.epochs().len(),
        relays = catalog.distinct_relays(),
        "Dataset covers {start} to {end}"
    );
    Ok(catalog)
}

/// Builds a catalog from parsed documents labelled with their source.
///
/// # Errors
///
/// - `DatasetError::InvalidFingerprint` - If a relay fingerprint is not 20 bytes of hex
/// - `DatasetError::InvalidPolicy` - If an exit policy cannot be parsed
/// - `DatasetError::Catalog` - If the epochs do not form a valid catalog
pub fn catalog_from_documents(
    mut documents: Vec<(String, ConsensusDocument)>,
) -> Result<RelayCatalog, DatasetError> {
    documents.sort_by_key(|(_, document)| document.valid_after);

    let mut allocator = RelayIdAllocator::default();
    let mut epochs = Vec::with_capacity(documents.len());
    for (path, document) in &documents {
        epochs.push(build_epoch(path, document, &mut allocator)?);
    }

    Ok(RelayCatalog::from_epochs(epochs)?)
}

fn build_epoch(
    path: &str,
    document: &ConsensusDocument,
    allocator: &mut RelayIdAllocator,
) -> Result<ConsensusEpoch, DatasetError> {
    let mut fingerprints = Vec::with_capacity(document.relays.len());
    for relay in &document.relays {
        let fingerprint =
            normalize_fingerprint(&relay.fingerprint).map_err(|fingerprint| {
                DatasetError::InvalidFingerprint {
                    path: path.to_string(),
                    fingerprint,
                }
            })?;
        allocator.assign(&fingerprint);
        fingerprints.push(fingerprint);
    }

    let mut relays = Vec::with_capacity(document.relays.len());
    for (entry, fingerprint) in document.relays.iter().zip(fingerprints) {
        let id = allocator.assign(&fingerprint);
        let flags = parse_flags(&entry.flags);
        let exit_policy = match &entry.exit_policy {
            Some(policy) => policy.parse().map_err(|source| DatasetError::InvalidPolicy {
                path: path.to_string(),
                fingerprint: fingerprint.clone(),
                source,
            })?,
            None => ExitPolicy::reject_all(),
        };
        let family: BTreeSet<RelayId> = entry
            .family
            .iter()
            .filter_map(|member| normalize_fingerprint(member).ok())
            .filter_map(|member| allocator.lookup(&member))
            .filter(|member| *member != id)
            .collect();

        relays.push(Relay {
            id,
            fingerprint,
            nickname: entry.nickname.clone(),
            address: entry.address,
            bandwidth: entry.bandwidth,
            flags,
            family,
            exit_policy,
        });
    }

    let weights = document
        .bandwidth_weights
        .as_ref()
        .map(PositionWeights::from_bandwidth_weights)
        .unwrap_or_default();

    Ok(ConsensusEpoch::new(
        document.valid_after,
        document.valid_until,
        weights,
        relays,
    ))
}

fn parse_flags(names: &[String]) -> RelayFlags {
    names.iter().fold(RelayFlags::empty(), |flags, name| match name.parse::<Flag>() {
        Ok(flag) => flags.with(flag),
        Err(_) => {
            trace!(flag = %name, "Ignoring unmodelled relay flag");
            flags
        }
    })
}
