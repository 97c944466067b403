//! Lorebase document store: the searchable core of the advisory knowledge corpus.
//!
//! The corpus is a tree of markdown files (tasks, incidents, standards). This
//! crate owns everything that has to stay consistent about it:
//!
//! - `classify`: path + content → [`DocumentKind`], as an ordered rule list
//! - `tokenize` + `index`: the in-memory inverted index behind ranked search
//! - `store`: [`store::DocumentStore`] — documents, index and registry under
//!   one owner, rebuilt from disk on startup (no persistence engine)
//! - `registry`: stable logical identifiers that survive file moves,
//!   persisted write-through to a human-diffable JSON file
//! - `mutate`: [`mutate::AtomicMutator`] — the crash-safe create/update/
//!   archive protocol (backup → write → verify → rollback-on-failure)
//! - `probe`: optional collaborator interfaces (external sync verification,
//!   duplicate detection) with typed "absent" states
//!
//! Design rules:
//!
//! 1. The store is an explicitly constructed object handed to callers; there
//!    are no process-wide singletons and no import-time side effects.
//! 2. Nothing in this crate spawns threads. Concurrent use is bounded by
//!    `RwLock<DocumentStore>` plus the mutator's per-path locks.
//! 3. A mutation leaves the target file in either its pre- or post-mutation
//!    state, never a partial write.

pub mod classify;
pub mod index;
pub mod mutate;
pub mod probe;
pub mod registry;
pub mod store;
pub mod tokenize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use classify::classify;
pub use index::{InvertedIndex, ScoredPath};
pub use mutate::{AtomicMutator, MutationError, MutationOptions, MutationReceipt, Operation};
pub use probe::{
    DigestDuplicateChecker, DuplicateChecker, DuplicateVerdict, NoopDuplicateChecker,
    NoopSyncProbe, SyncProbe, SyncStatus,
};
pub use registry::{LogicalId, LogicalIdError, LogicalIdRegistry, RegistryError};
pub use store::{DocumentStore, ScanOptions, SearchHit, StoreStatistics};

// ============================================================================
// Document kinds
// ============================================================================

/// What a corpus file *is*, as decided by the classifier.
///
/// Archived variants exist only for the three kinds the team actually
/// archives; `Project` and `Unknown` keep their base kind even under an
/// archive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Task,
    Incident,
    Standard,
    ArchivedTask,
    ArchivedIncident,
    ArchivedStandard,
    Project,
    Unknown,
}

impl DocumentKind {
    /// The archived variant of this kind, where one exists.
    pub fn archived(self) -> Self {
        match self {
            DocumentKind::Task => DocumentKind::ArchivedTask,
            DocumentKind::Incident => DocumentKind::ArchivedIncident,
            DocumentKind::Standard => DocumentKind::ArchivedStandard,
            other => other,
        }
    }

    /// The live (non-archived) counterpart of this kind.
    pub fn base(self) -> Self {
        match self {
            DocumentKind::ArchivedTask => DocumentKind::Task,
            DocumentKind::ArchivedIncident => DocumentKind::Incident,
            DocumentKind::ArchivedStandard => DocumentKind::Standard,
            other => other,
        }
    }

    pub fn is_archived(self) -> bool {
        matches!(
            self,
            DocumentKind::ArchivedTask
                | DocumentKind::ArchivedIncident
                | DocumentKind::ArchivedStandard
        )
    }

    /// Subdirectory of the archive root that holds this kind.
    pub fn archive_partition(self) -> &'static str {
        match self.base() {
            DocumentKind::Task => "tasks",
            DocumentKind::Incident => "incidents",
            DocumentKind::Standard => "standards",
            DocumentKind::Project => "projects",
            DocumentKind::Unknown => "misc",
            // `base()` never returns an archived variant.
            _ => "misc",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Task => "task",
            DocumentKind::Incident => "incident",
            DocumentKind::Standard => "standard",
            DocumentKind::ArchivedTask => "archived_task",
            DocumentKind::ArchivedIncident => "archived_incident",
            DocumentKind::ArchivedStandard => "archived_standard",
            DocumentKind::Project => "project",
            DocumentKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" => Ok(DocumentKind::Task),
            "incident" => Ok(DocumentKind::Incident),
            "standard" => Ok(DocumentKind::Standard),
            "archived_task" => Ok(DocumentKind::ArchivedTask),
            "archived_incident" => Ok(DocumentKind::ArchivedIncident),
            "archived_standard" => Ok(DocumentKind::ArchivedStandard),
            "project" => Ok(DocumentKind::Project),
            "unknown" | "document" => Ok(DocumentKind::Unknown),
            other => Err(format!("unknown document kind `{other}`")),
        }
    }
}

// ============================================================================
// Content digests
// ============================================================================

/// Prefix used in serialized content digests.
pub const CONTENT_DIGEST_PREFIX: &str = "sha256:";

/// A content fingerprint: `"sha256:<64 lowercase hex digits>"`.
///
/// Digests identify document *content* independent of path. They back the
/// duplicate-detection gate and the mutator's post-write validation; they are
/// not used as document identifiers (paths are).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn of(content: &str) -> Self {
        let hash = Sha256::digest(content.as_bytes());
        let mut hex = String::with_capacity(CONTENT_DIGEST_PREFIX.len() + 64);
        hex.push_str(CONTENT_DIGEST_PREFIX);
        for byte in hash {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Documents
// ============================================================================

/// One indexed corpus file.
///
/// Exactly one `Document` exists per path. `last_modified` is the filesystem
/// mtime captured when the document was (re)indexed; if the file's mtime has
/// advanced past it, the document is stale and the next scan re-indexes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    pub kind: DocumentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub raw_content: String,
    pub digest: ContentDigest,
}

impl Document {
    /// Build a document from file content plus the mtime observed on disk.
    pub fn new(
        path: PathBuf,
        kind: DocumentKind,
        content: String,
        last_modified: DateTime<Utc>,
    ) -> Self {
        let title = extract_title(&content);
        let digest = ContentDigest::of(&content);
        Self {
            path,
            kind,
            title,
            last_modified,
            raw_content: content,
            digest,
        }
    }
}

/// First markdown heading of the content, if any.
///
/// Decoration (emoji, extra `#`) is stripped; an empty heading counts as no
/// title.
pub fn extract_title(content: &str) -> Option<String> {
    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix('#') {
            let heading = rest.trim_start_matches('#').trim();
            if heading.is_empty() {
                continue;
            }
            return Some(heading.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_has_expected_prefix_and_width() {
        let d = ContentDigest::of("# Заголовок\n\nтело\n");
        assert!(d.as_str().starts_with(CONTENT_DIGEST_PREFIX));
        assert_eq!(d.as_str().len(), CONTENT_DIGEST_PREFIX.len() + 64);
    }

    #[test]
    fn digest_is_content_addressed() {
        let a = ContentDigest::of("same text");
        let b = ContentDigest::of("same text");
        let c = ContentDigest::of("other text");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn archived_round_trips_through_base() {
        for kind in [
            DocumentKind::Task,
            DocumentKind::Incident,
            DocumentKind::Standard,
        ] {
            assert!(kind.archived().is_archived());
            assert_eq!(kind.archived().base(), kind);
        }
        assert_eq!(DocumentKind::Project.archived(), DocumentKind::Project);
        assert_eq!(DocumentKind::Unknown.archived(), DocumentKind::Unknown);
    }

    #[test]
    fn title_comes_from_first_nonempty_heading() {
        let content = "\n## 🎯 Цель\n\nОписание процесса.\n";
        assert_eq!(extract_title(content).as_deref(), Some("🎯 Цель"));
        assert_eq!(extract_title("plain text, no headings"), None);
        assert_eq!(extract_title("##\n# Real title\n").as_deref(), Some("Real title"));
    }

    #[test]
    fn kind_parses_from_cli_spelling() {
        assert_eq!("task".parse::<DocumentKind>().unwrap(), DocumentKind::Task);
        assert_eq!(
            "Archived_Standard".parse::<DocumentKind>().unwrap(),
            DocumentKind::ArchivedStandard
        );
        assert!("note".parse::<DocumentKind>().is_err());
    }
}
