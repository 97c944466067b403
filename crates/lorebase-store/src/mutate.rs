//! Crash-safe create/update/archive protocol for corpus files.
//!
//! Protocol shape, per operation:
//!
//! - `create`: duplicate gate → existence gate → pre-check → write →
//!   post-check. No previous state exists, so nothing ever rolls back; an
//!   unconfirmed post-check is a receipt warning, not an error.
//! - `update`: existence gate → duplicate gate (self excluded) → pre-check →
//!   backup **copy** to `<path>.bak` → overwrite → post-check → delete
//!   backup. Any failure between backup and commit restores the original via
//!   an atomic **rename** of the backup. The copy/rename asymmetry is load
//!   bearing: the restore step must be the atomic one.
//! - `archive`: existence gate → collision-free destination under the
//!   archive root → atomic rename → post-check. The move is logically
//!   complete once the rename lands; a late post-check failure only warns.
//!
//! At every observable point the target file holds either its pre-mutation
//! or its post-mutation content. After the commit point, remaining work
//! (index refresh, registry relocation) degrades to receipt warnings.
//!
//! Collaborators are optional and typed: a missing [`SyncProbe`] skips the
//! checks, a missing [`DuplicateChecker`] assumes unique. Collaborator calls
//! never run under the store guard, so a checker may itself read the store.
//! Mutations of one path serialize on a per-path lock; readers keep reading
//! the last committed in-memory state.

use crate::probe::{DuplicateChecker, DuplicateVerdict, SyncProbe, SyncStatus};
use crate::store::DocumentStore;
use crate::DocumentKind;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

const BACKUP_SUFFIX: &str = ".bak";

// ============================================================================
// Options, receipts, errors
// ============================================================================

/// Knobs for the bounded post-check wait.
#[derive(Debug, Clone)]
pub struct MutationOptions {
    pub postcheck_attempts: u32,
    pub postcheck_interval: Duration,
    /// Hard cap on the total post-check wait, so callers can cancel earlier
    /// than `attempts × interval`.
    pub deadline: Option<Duration>,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            postcheck_attempts: 5,
            postcheck_interval: Duration::from_secs(1),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Archive,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Archive => "archive",
        })
    }
}

/// Successful mutation outcome. `path` is where the document lives *after*
/// the mutation (the archive destination for `archive`).
#[derive(Debug, Clone, Serialize)]
pub struct MutationReceipt {
    pub path: PathBuf,
    pub operation: Operation,
    /// Soft failures that did not stop the mutation (unconfirmed sync,
    /// post-commit refresh problems).
    pub warnings: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("no document at {}", path.display())]
    NotFound { path: PathBuf },
    #[error("a file already exists at {}", path.display())]
    AlreadyExists { path: PathBuf },
    #[error("duplicate content, conflicts with {}: {explanation}", conflicting_path.display())]
    DuplicateContent {
        conflicting_path: PathBuf,
        explanation: String,
    },
    /// Update-only: the post-check stayed inconsistent through the retry
    /// budget. The original content has already been restored.
    #[error("synchronization unconfirmed for {}; previous content restored", path.display())]
    ConsistencyUnconfirmed { path: PathBuf },
    /// Filesystem failure. For `update` the original content has already
    /// been restored; for `create` there is no prior state to protect.
    #[error("{operation} failed for {}: {source}", path.display())]
    Io {
        operation: Operation,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Double fault: the mutation failed and the restore rename failed too.
    /// The backup is left in place for manual recovery.
    #[error("rollback failed for {} after `{cause}`; backup left at {}: {source}", path.display(), backup.display())]
    RollbackFailed {
        path: PathBuf,
        backup: PathBuf,
        cause: String,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Mutator
// ============================================================================

enum PostcheckOutcome {
    Confirmed,
    /// Probe absent or backend unavailable.
    Skipped,
    Unconfirmed { attempts: u32 },
}

/// The mutation protocol, bound to one store and one archive root.
pub struct AtomicMutator {
    store: Arc<RwLock<DocumentStore>>,
    archive_root: PathBuf,
    sync_probe: Option<Arc<dyn SyncProbe>>,
    duplicate_checker: Option<Arc<dyn DuplicateChecker>>,
    options: MutationOptions,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl AtomicMutator {
    pub fn new(store: Arc<RwLock<DocumentStore>>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            archive_root: archive_root.into(),
            sync_probe: None,
            duplicate_checker: None,
            options: MutationOptions::default(),
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_sync_probe(mut self, probe: Arc<dyn SyncProbe>) -> Self {
        self.sync_probe = Some(probe);
        self
    }

    pub fn with_duplicate_checker(mut self, checker: Arc<dyn DuplicateChecker>) -> Self {
        self.duplicate_checker = Some(checker);
        self
    }

    pub fn with_options(mut self, options: MutationOptions) -> Self {
        self.options = options;
        self
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Create a new document. Fails on duplicate content or an existing
    /// path; a partially written file is left in place on late I/O errors
    /// (there is no previous state to restore).
    pub fn create(
        &self,
        path: &Path,
        content: &str,
        kind: DocumentKind,
    ) -> Result<MutationReceipt, MutationError> {
        let lock = self.path_lock(path);
        let _guard = lock.lock();
        let mut warnings = Vec::new();

        self.duplicate_gate(content, kind, None)?;
        if path.exists() {
            return Err(MutationError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        self.precheck(path, &mut warnings);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|source| io_error(Operation::Create, path, source))?;
            }
        }
        fs::write(path, content).map_err(|source| io_error(Operation::Create, path, source))?;

        if let PostcheckOutcome::Unconfirmed { attempts } = self.postcheck(path) {
            warn!(file = %path.display(), attempts, "create committed with unconfirmed synchronization");
            warnings.push(format!(
                "synchronization unconfirmed after {attempts} attempts; file is on disk"
            ));
        }
        self.refresh_index(path, &mut warnings);

        Ok(MutationReceipt {
            path: path.to_path_buf(),
            operation: Operation::Create,
            warnings,
        })
    }

    /// Overwrite an existing document, restoring the original on any
    /// failure. Either the old or the new content is on disk at every point.
    pub fn update(
        &self,
        path: &Path,
        content: &str,
        kind: DocumentKind,
    ) -> Result<MutationReceipt, MutationError> {
        let lock = self.path_lock(path);
        let _guard = lock.lock();
        let mut warnings = Vec::new();

        if !path.exists() {
            return Err(MutationError::NotFound {
                path: path.to_path_buf(),
            });
        }
        self.duplicate_gate(content, kind, Some(path))?;
        self.precheck(path, &mut warnings);

        // Backup is a full byte copy; the original stays untouched until the
        // copy is complete.
        let backup = backup_path(path);
        if let Err(source) = fs::copy(path, &backup) {
            let _ = fs::remove_file(&backup);
            return Err(io_error(Operation::Update, path, source));
        }

        if let Err(source) = fs::write(path, content) {
            return Err(rollback(path, &backup, io_error(Operation::Update, path, source)));
        }

        match self.postcheck(path) {
            PostcheckOutcome::Confirmed | PostcheckOutcome::Skipped => {}
            PostcheckOutcome::Unconfirmed { attempts } => {
                warn!(file = %path.display(), attempts, "update post-check failed, restoring previous content");
                return Err(rollback(
                    path,
                    &backup,
                    MutationError::ConsistencyUnconfirmed {
                        path: path.to_path_buf(),
                    },
                ));
            }
        }

        // Commit point: dropping the backup makes the new content the only
        // recoverable state.
        if let Err(err) = fs::remove_file(&backup) {
            warn!(backup = %backup.display(), error = %err, "could not delete backup after commit");
            warnings.push(format!(
                "backup left behind at {}: {err}",
                backup.display()
            ));
        }
        self.refresh_index(path, &mut warnings);

        Ok(MutationReceipt {
            path: path.to_path_buf(),
            operation: Operation::Update,
            warnings,
        })
    }

    /// Move a document under the archive root, partitioned by kind, never
    /// overwriting an existing archive entry. The receipt carries the
    /// destination path.
    pub fn archive(&self, path: &Path, kind: DocumentKind) -> Result<MutationReceipt, MutationError> {
        let lock = self.path_lock(path);
        let _guard = lock.lock();
        let mut warnings = Vec::new();

        if !path.exists() {
            return Err(MutationError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let partition = self.archive_root.join(kind.archive_partition());
        fs::create_dir_all(&partition)
            .map_err(|source| io_error(Operation::Archive, path, source))?;
        let file_name = path.file_name().ok_or_else(|| MutationError::NotFound {
            path: path.to_path_buf(),
        })?;
        let destination = unique_destination(&partition, Path::new(file_name));

        // Atomic move; on failure the source is still in place, so there is
        // nothing to roll back.
        fs::rename(path, &destination)
            .map_err(|source| io_error(Operation::Archive, path, source))?;

        if let PostcheckOutcome::Unconfirmed { attempts } = self.postcheck(&destination) {
            warn!(
                file = %destination.display(),
                attempts,
                "archive committed with unconfirmed synchronization"
            );
            warnings.push(format!(
                "synchronization unconfirmed after {attempts} attempts; move already complete"
            ));
        }

        {
            let mut store = self.store.write();
            store.remove_document(path);
            if let Err(err) = store.index_file(&destination, true) {
                warn!(file = %destination.display(), error = %err, "archived file not re-indexed");
                warnings.push(format!(
                    "index refresh failed for {}: {err}",
                    destination.display()
                ));
            }
            if let Err(err) = store.registry_mut().relocate(path, &destination) {
                warn!(file = %destination.display(), error = %err, "registry not relocated");
                warnings.push(format!("registry relocation failed: {err}"));
            }
        }

        Ok(MutationReceipt {
            path: destination,
            operation: Operation::Archive,
            warnings,
        })
    }

    // ========================================================================
    // Protocol pieces
    // ========================================================================

    fn duplicate_gate(
        &self,
        content: &str,
        kind: DocumentKind,
        exclude: Option<&Path>,
    ) -> Result<(), MutationError> {
        let Some(checker) = &self.duplicate_checker else {
            return Ok(());
        };
        match checker.check(content, kind, exclude) {
            DuplicateVerdict::Unique => Ok(()),
            DuplicateVerdict::Duplicate {
                conflicting_path,
                explanation,
            } => Err(MutationError::DuplicateContent {
                conflicting_path,
                explanation,
            }),
        }
    }

    /// Pre-write consistency check. An inconsistent prior state triggers one
    /// repair attempt and a warning; the write still proceeds. Absence of
    /// the probe is a silent skip.
    fn precheck(&self, path: &Path, warnings: &mut Vec<String>) {
        let Some(probe) = &self.sync_probe else { return };
        if probe.verify(path) == SyncStatus::Inconsistent {
            let repaired = probe.repair();
            warn!(file = %path.display(), repaired, "inconsistent state before write");
            warnings.push(format!(
                "pre-check found {} inconsistent; repair {}",
                path.display(),
                if repaired { "ran" } else { "was not performed" }
            ));
        }
    }

    /// Bounded verification wait: poll the probe up to `postcheck_attempts`
    /// times, sleeping `postcheck_interval` between polls, never past the
    /// caller deadline.
    fn postcheck(&self, path: &Path) -> PostcheckOutcome {
        let Some(probe) = &self.sync_probe else {
            return PostcheckOutcome::Skipped;
        };
        let started = Instant::now();
        let attempts = self.options.postcheck_attempts.max(1);
        for attempt in 1..=attempts {
            match probe.verify(path) {
                SyncStatus::Consistent => return PostcheckOutcome::Confirmed,
                SyncStatus::Unavailable => return PostcheckOutcome::Skipped,
                SyncStatus::Inconsistent => {}
            }
            if attempt == attempts {
                break;
            }
            if let Some(deadline) = self.options.deadline {
                if started.elapsed() + self.options.postcheck_interval > deadline {
                    return PostcheckOutcome::Unconfirmed { attempts: attempt };
                }
            }
            thread::sleep(self.options.postcheck_interval);
        }
        PostcheckOutcome::Unconfirmed { attempts }
    }

    /// Post-commit store refresh. Failures degrade to warnings; the next
    /// scan repairs the index.
    fn refresh_index(&self, path: &Path, warnings: &mut Vec<String>) {
        let mut store = self.store.write();
        if let Err(err) = store.index_file(path, true) {
            warn!(file = %path.display(), error = %err, "post-mutation index refresh failed");
            warnings.push(format!("index refresh failed for {}: {err}", path.display()));
        }
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut table = self.path_locks.lock();
        table.entry(path.to_path_buf()).or_default().clone()
    }
}

// ============================================================================
// Free helpers
// ============================================================================

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

fn io_error(operation: Operation, path: &Path, source: io::Error) -> MutationError {
    MutationError::Io {
        operation,
        path: path.to_path_buf(),
        source,
    }
}

/// Restore `path` from `backup` with an atomic rename, then hand back the
/// failure that forced the restore. A failed rename is the double fault.
fn rollback(path: &Path, backup: &Path, cause: MutationError) -> MutationError {
    match fs::rename(backup, path) {
        Ok(()) => cause,
        Err(source) => MutationError::RollbackFailed {
            path: path.to_path_buf(),
            backup: backup.to_path_buf(),
            cause: cause.to_string(),
            source,
        },
    }
}

/// First free name for `file_name` inside `dir`: the name itself, then
/// timestamp-suffixed variants (with a counter for same-second collisions).
fn unique_destination(dir: &Path, file_name: &Path) -> PathBuf {
    let plain = dir.join(file_name);
    if !plain.exists() {
        return plain;
    }
    let stem = file_name
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let extension = file_name
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut counter = 0u32;
    loop {
        let name = if counter == 0 {
            format!("{stem}-{timestamp}{extension}")
        } else {
            format!("{stem}-{timestamp}-{counter}{extension}")
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
