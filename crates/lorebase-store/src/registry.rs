//! Stable logical identifiers for corpus documents.
//!
//! A [`LogicalId`] (`<type>:<name>[#subpath]`) names a document independent
//! of its physical path, so links keep working when files move. The
//! [`LogicalIdRegistry`] holds the forward map plus a reverse map kept in
//! lock-step, and persists write-through: every successful mutation rewrites
//! the registry file (pretty JSON, temp file then rename), so a crash loses
//! at most the in-flight registration.
//!
//! Loading is tolerant: a missing file means an empty registry, a corrupt
//! file is logged and treated as empty. Registry problems never abort store
//! startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

use crate::DocumentKind;

const REGISTRY_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Logical identifiers
// ============================================================================

/// A validated `<type>:<name>[#subpath]` identifier.
///
/// The name segment may itself contain `:` (synthetic ids use
/// `temp:<kind>:<slug>`); only the first separator is structural.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

/// Why a string failed to parse as a [`LogicalId`].
#[derive(Debug, thiserror::Error)]
pub enum LogicalIdError {
    #[error("logical id `{0}` is missing the `:` separator (expected `<type>:<name>[#subpath]`)")]
    MissingSeparator(String),
    #[error("logical id `{0}` has an empty type, name or subpath segment")]
    EmptySegment(String),
    #[error("logical id `{0}` contains whitespace")]
    Whitespace(String),
}

impl LogicalId {
    pub fn new(raw: impl Into<String>) -> Result<Self, LogicalIdError> {
        let raw = raw.into();
        if raw.chars().any(char::is_whitespace) {
            return Err(LogicalIdError::Whitespace(raw));
        }
        let Some((id_type, rest)) = raw.split_once(':') else {
            return Err(LogicalIdError::MissingSeparator(raw));
        };
        let (name, subpath) = match rest.split_once('#') {
            Some((name, subpath)) => (name, Some(subpath)),
            None => (rest, None),
        };
        if id_type.is_empty() || name.is_empty() || subpath.is_some_and(str::is_empty) {
            return Err(LogicalIdError::EmptySegment(raw));
        }
        Ok(Self(raw))
    }

    /// Synthetic identifier for a document that has no registered id yet.
    /// The slug is expected to be pre-sanitized (no whitespace).
    pub fn temp(kind: DocumentKind, slug: &str) -> Self {
        let slug = if slug.is_empty() { "untitled" } else { slug };
        Self(format!("temp:{}:{slug}", kind.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `<type>` segment.
    pub fn id_type(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// The `<name>` segment, without any `#subpath`.
    pub fn name(&self) -> &str {
        let rest = self.0.split_once(':').map(|(_, rest)| rest).unwrap_or("");
        rest.split('#').next().unwrap_or_default()
    }

    /// The `#subpath` fragment, if present.
    pub fn subpath(&self) -> Option<&str> {
        self.0.split_once('#').map(|(_, sub)| sub)
    }

    pub fn is_temporary(&self) -> bool {
        self.id_type() == "temp"
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LogicalId {
    type Err = LogicalIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for LogicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry mutation failures. Load never fails; see [`LogicalIdRegistry::load`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("cannot register `{id}`: no file at {}", path.display())]
    PathMissing { id: LogicalId, path: PathBuf },
    #[error("failed to persist registry to {}: {source}", file.display())]
    Persist {
        file: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode registry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// On-disk shape of the registry file. Keys stay sorted (`BTreeMap`) so the
/// file diffs cleanly under version control.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryFileV1 {
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    ids: BTreeMap<String, PathBuf>,
}

/// Bidirectional id ↔ path map with write-through JSON persistence.
#[derive(Debug)]
pub struct LogicalIdRegistry {
    file: PathBuf,
    forward: BTreeMap<LogicalId, PathBuf>,
    reverse: HashMap<PathBuf, LogicalId>,
}

impl LogicalIdRegistry {
    /// Load the registry from `file`. Missing file → empty registry; corrupt
    /// or unreadable file → logged and treated as empty.
    pub fn load(file: impl Into<PathBuf>) -> Self {
        let mut registry = Self {
            file: file.into(),
            forward: BTreeMap::new(),
            reverse: HashMap::new(),
        };

        let raw = match fs::read_to_string(&registry.file) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return registry,
            Err(err) => {
                warn!(
                    file = %registry.file.display(),
                    error = %err,
                    "could not read registry file, starting empty"
                );
                return registry;
            }
        };

        match serde_json::from_str::<RegistryFileV1>(&raw) {
            Ok(wire) if wire.version == REGISTRY_FORMAT_VERSION => {
                for (raw_id, path) in wire.ids {
                    match raw_id.parse::<LogicalId>() {
                        Ok(id) => {
                            registry.reverse.insert(path.clone(), id.clone());
                            registry.forward.insert(id, path);
                        }
                        Err(err) => {
                            warn!(identifier = %raw_id, error = %err, "skipping malformed registry entry");
                        }
                    }
                }
            }
            Ok(wire) => {
                warn!(
                    file = %registry.file.display(),
                    version = wire.version,
                    "unsupported registry version, starting empty"
                );
            }
            Err(err) => {
                warn!(
                    file = %registry.file.display(),
                    error = %err,
                    "corrupt registry file, starting empty"
                );
            }
        }
        registry
    }

    /// Register (or explicitly re-register) `id` for `path` and persist.
    ///
    /// Fails if `path` does not exist on disk. The maps stay bijective: a
    /// previous id of `path` and a previous path of `id` are both dropped.
    pub fn register(&mut self, id: LogicalId, path: impl Into<PathBuf>) -> Result<(), RegistryError> {
        let path = path.into();
        if !path.exists() {
            return Err(RegistryError::PathMissing { id, path });
        }
        if let Some(previous_path) = self.forward.insert(id.clone(), path.clone()) {
            self.reverse.remove(&previous_path);
        }
        if let Some(previous_id) = self.reverse.insert(path, id.clone()) {
            if previous_id != id {
                self.forward.remove(&previous_id);
            }
        }
        self.persist()
    }

    /// Remove `id` and persist. Returns whether the id was present.
    pub fn unregister(&mut self, id: &LogicalId) -> Result<bool, RegistryError> {
        match self.forward.remove(id) {
            Some(path) => {
                self.reverse.remove(&path);
                self.persist()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Point whatever id currently maps to `from` at `to` instead (file
    /// moves, archiving). The caller has already performed the move, so the
    /// destination is not re-checked. Returns whether anything changed.
    pub fn relocate(&mut self, from: &Path, to: impl Into<PathBuf>) -> Result<bool, RegistryError> {
        let Some(id) = self.reverse.remove(from) else {
            return Ok(false);
        };
        let to = to.into();
        self.forward.insert(id.clone(), to.clone());
        self.reverse.insert(to, id);
        self.persist()?;
        Ok(true)
    }

    pub fn resolve(&self, id: &LogicalId) -> Option<&Path> {
        self.forward.get(id).map(PathBuf::as_path)
    }

    pub fn reverse(&self, path: &Path) -> Option<&LogicalId> {
        self.reverse.get(path)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// All registrations in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&LogicalId, &Path)> {
        self.forward.iter().map(|(id, path)| (id, path.as_path()))
    }

    pub fn file_path(&self) -> &Path {
        &self.file
    }

    /// Full rewrite of the registry file: encode, write a sibling temp file,
    /// rename over the target.
    fn persist(&self) -> Result<(), RegistryError> {
        let wire = RegistryFileV1 {
            version: REGISTRY_FORMAT_VERSION,
            updated_at: Utc::now(),
            ids: self
                .forward
                .iter()
                .map(|(id, path)| (id.as_str().to_string(), path.clone()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&wire)?;

        let io_err = |source| RegistryError::Persist {
            file: self.file.clone(),
            source,
        };
        if let Some(parent) = self.file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let mut tmp_name = self.file.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.file).map_err(io_err)
    }
}
