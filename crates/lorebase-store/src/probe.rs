//! Optional collaborator interfaces for the mutation protocol.
//!
//! Two external systems gate writes without being part of this crate: an
//! external synchronization mirror and a duplicate detector. Both are modeled
//! as traits with a no-op implementation, so "the collaborator is absent" is
//! a typed state the mutator can branch on instead of a swallowed error:
//! an unavailable sync probe means "skip the check", an absent duplicate
//! checker means "assume unique".

use crate::store::DocumentStore;
use crate::{ContentDigest, DocumentKind};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// Synchronization probe
// ============================================================================

/// Answer from one [`SyncProbe::verify`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Consistent,
    Inconsistent,
    /// The probe has no backend to ask. Treated as "skip", never as failure.
    Unavailable,
}

/// External synchronization check (e.g. a mirror or export pipeline).
pub trait SyncProbe: Send + Sync {
    /// Is `path` consistent with the external system right now?
    fn verify(&self, path: &Path) -> SyncStatus;

    /// Ask the external system to reconcile itself. Returns whether a repair
    /// was actually performed.
    fn repair(&self) -> bool;
}

/// Probe used when no synchronization backend is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSyncProbe;

impl SyncProbe for NoopSyncProbe {
    fn verify(&self, _path: &Path) -> SyncStatus {
        SyncStatus::Unavailable
    }

    fn repair(&self) -> bool {
        false
    }
}

// ============================================================================
// Duplicate detection
// ============================================================================

/// Answer from one [`DuplicateChecker::check`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateVerdict {
    Unique,
    Duplicate {
        conflicting_path: PathBuf,
        explanation: String,
    },
}

impl DuplicateVerdict {
    pub fn is_unique(&self) -> bool {
        matches!(self, DuplicateVerdict::Unique)
    }
}

/// Content-level duplicate detection, consulted before any write.
pub trait DuplicateChecker: Send + Sync {
    /// Is `content` new to the corpus? `exclude` names a path whose own
    /// content must not count as a conflict (an update compared to itself).
    fn check(&self, content: &str, kind: DocumentKind, exclude: Option<&Path>) -> DuplicateVerdict;
}

/// Checker used when no duplicate detector is wired in: everything is unique.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDuplicateChecker;

impl DuplicateChecker for NoopDuplicateChecker {
    fn check(
        &self,
        _content: &str,
        _kind: DocumentKind,
        _exclude: Option<&Path>,
    ) -> DuplicateVerdict {
        DuplicateVerdict::Unique
    }
}

/// Digest-backed duplicate detection over the in-memory corpus: content is a
/// duplicate when some other indexed document carries the same digest.
pub struct DigestDuplicateChecker {
    store: Arc<RwLock<DocumentStore>>,
}

impl DigestDuplicateChecker {
    pub fn new(store: Arc<RwLock<DocumentStore>>) -> Self {
        Self { store }
    }
}

impl DuplicateChecker for DigestDuplicateChecker {
    fn check(&self, content: &str, _kind: DocumentKind, exclude: Option<&Path>) -> DuplicateVerdict {
        let digest = ContentDigest::of(content);
        let store = self.store.read();
        match store.find_by_digest(&digest, exclude) {
            Some(conflict) => DuplicateVerdict::Duplicate {
                explanation: format!(
                    "identical content already indexed at {}",
                    conflict.display()
                ),
                conflicting_path: conflict.to_path_buf(),
            },
            None => DuplicateVerdict::Unique,
        }
    }
}
