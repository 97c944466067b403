//! Typed link graph over a Lorebase corpus.
//!
//! Relations are directed observations extracted from document text. An
//! analysis run never mutates documents; it produces an append-only batch of
//! [`Relation`] values that callers may persist as a versioned
//! [`RelationsFileV1`] dump.
//!
//! Design notes:
//! - Endpoints are logical ids, not paths, so a dump stays meaningful after
//!   documents move or get archived
//! - Relation types carry domain meaning (a task addressing an incident, a
//!   document citing a standard), with [`RelationType::Mentions`] as the
//!   weakest fallback
//! - Extraction is deterministic for fixed corpus content

pub mod extract;

pub use extract::RelationExtractor;

use anyhow::Context;
use chrono::{DateTime, Utc};
use lorebase_store::LogicalId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Current on-disk version of a relations dump.
pub const RELATIONS_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Relation model
// ============================================================================

/// How one document relates to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Weakest signal: the source text refers to the target with no
    /// stronger cue.
    Mentions,
    /// The two documents cover overlapping material.
    SimilarContent,
    /// The source cannot proceed without the target.
    DependsOn,
    /// The source is a piece of the target.
    PartOf,
    /// Explicitly related, direction carries no extra meaning.
    RelatedTo,
    /// The source replaces the target.
    Supersedes,
    /// The source implements what the target specifies.
    Implements,
    /// The source is derived from the target.
    DerivesFrom,
    /// A document cites a standard.
    ReferencesStandard,
    /// An incident calls for a follow-up task.
    RequiresTask,
    /// A task addresses an incident.
    AddressesIncident,
    /// Two standards reference each other's territory.
    RelatedStandard,
    /// The source was caused by the target.
    CausedBy,
    /// The source resolves the target.
    Resolves,
    /// The source continues work started in the target.
    Continues,
    /// The source duplicates the target.
    Duplicates,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Mentions => "mentions",
            RelationType::SimilarContent => "similar_content",
            RelationType::DependsOn => "depends_on",
            RelationType::PartOf => "part_of",
            RelationType::RelatedTo => "related_to",
            RelationType::Supersedes => "supersedes",
            RelationType::Implements => "implements",
            RelationType::DerivesFrom => "derives_from",
            RelationType::ReferencesStandard => "references_standard",
            RelationType::RequiresTask => "requires_task",
            RelationType::AddressesIncident => "addresses_incident",
            RelationType::RelatedStandard => "related_standard",
            RelationType::CausedBy => "caused_by",
            RelationType::Resolves => "resolves",
            RelationType::Continues => "continues",
            RelationType::Duplicates => "duplicates",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single directed, confidence-scored relation between two documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: LogicalId,
    pub target_id: LogicalId,
    pub relation_type: RelationType,
    /// 0.0 to 1.0; explicit in-text markers score 1.0.
    pub confidence: f64,
    /// Free-form provenance, e.g. the marker kind and the evidence line.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    /// The (source, target, type) triple that identifies this edge
    /// independently of when it was observed.
    pub fn edge(&self) -> (&LogicalId, &LogicalId, RelationType) {
        (&self.source_id, &self.target_id, self.relation_type)
    }
}

// ============================================================================
// Versioned dump
// ============================================================================

/// On-disk container for the relations produced by one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationsFileV1 {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub relations: Vec<Relation>,
}

impl RelationsFileV1 {
    pub fn new(relations: Vec<Relation>) -> Self {
        RelationsFileV1 {
            version: RELATIONS_FORMAT_VERSION,
            generated_at: Utc::now(),
            relations,
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let encoded = serde_json::to_string_pretty(self).context("encoding relations dump")?;
        fs::write(path, encoded)
            .with_context(|| format!("writing relations dump to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading relations dump from {}", path.display()))?;
        let file: RelationsFileV1 = serde_json::from_str(&raw)
            .with_context(|| format!("decoding relations dump {}", path.display()))?;
        anyhow::ensure!(
            file.version == RELATIONS_FORMAT_VERSION,
            "unsupported relations dump version {} in {}",
            file.version,
            path.display()
        );
        Ok(file)
    }
}
