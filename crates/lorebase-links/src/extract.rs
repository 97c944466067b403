//! Relation extraction from document text.
//!
//! Three explicit markers are recognized, scanned line by line:
//! - Markdown links `[text](target.md)`, resolved relative to the source
//!   file and reverse-mapped through the registry
//! - Wiki links `[[type:name]]`, accepted only for registered identifiers
//! - Bare mentions of registered identifiers, matched only on identifier
//!   boundaries so an id never matches inside a longer one
//!
//! Each emitted relation is typed by [`relation_type_for`]: the
//! (source-kind, target-kind) pair picks a default, then the keyword table
//! is scanned in declared order with later matches overwriting earlier
//! ones. The surrounding line is the keyword context.
//!
//! A run is read-only and idempotent in content. Results are not
//! deduplicated against earlier runs; callers append or clear as they see
//! fit.

use crate::{Relation, RelationType};
use anyhow::{Context, Result};
use chrono::Utc;
use lorebase_store::{classify, DocumentKind, DocumentStore, LogicalId};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Explicit in-text markers are the strongest signal we have.
const EXPLICIT_CONFIDENCE: f64 = 1.0;

/// Evidence lines in metadata are clipped to this many characters.
const EVIDENCE_MAX_CHARS: usize = 160;

/// Character budget for slugs in synthetic identifiers.
const SLUG_MAX_CHARS: usize = 160;

/// Keyword upgrades for the relation type, scanned over the lowercased
/// link line in this exact order. Later matches overwrite earlier ones,
/// so when a line carries several cues the last rule in the table wins.
const KEYWORD_RULES: &[(&[&str], RelationType)] = &[
    (&["related", "связан"], RelationType::RelatedTo),
    (&["similar", "похож"], RelationType::SimilarContent),
    (&["depends", "зависит"], RelationType::DependsOn),
    (&["part of", "часть"], RelationType::PartOf),
    (&["implements", "реализует"], RelationType::Implements),
    (&["derives", "основан"], RelationType::DerivesFrom),
    (&["caused by", "вызван"], RelationType::CausedBy),
    (&["resolves", "решает"], RelationType::Resolves),
    (&["continues", "продолжение"], RelationType::Continues),
    (&["duplicate", "дубликат"], RelationType::Duplicates),
    (&["supersedes", "новая версия", "заменяет"], RelationType::Supersedes),
];

// ============================================================================
// Extractor
// ============================================================================

/// Scans documents for link markers and emits typed relations.
///
/// Reads document content through the store cache when available, falling
/// back to the filesystem, so it can analyze files that were never indexed.
pub struct RelationExtractor {
    store: Arc<RwLock<DocumentStore>>,
    md_link: Regex,
    wiki_link: Regex,
}

impl RelationExtractor {
    pub fn new(store: Arc<RwLock<DocumentStore>>) -> Self {
        RelationExtractor {
            store,
            md_link: Regex::new(r"\[([^\]]*)\]\(([^()\s]+)\)").unwrap(),
            wiki_link: Regex::new(r"\[\[([^\[\]]+)\]\]").unwrap(),
        }
    }

    /// Extract all relations whose source is the given document.
    ///
    /// The source identity is the registered identifier when one exists,
    /// otherwise a synthetic `temp:<kind>:<slug>` identifier, so every
    /// document can participate in the graph before formal registration.
    pub fn analyze(&self, path: &Path) -> Result<Vec<Relation>> {
        let (content, source_kind) = self.content_and_kind(path)?;
        let source_id = self.identity_for(path, source_kind);

        let mut relations = Vec::new();
        // Targets already covered by an explicit link; the bare-mention
        // pass skips these to avoid double counting within one run.
        let mut linked: HashSet<LogicalId> = HashSet::new();

        for line in content.lines() {
            self.collect_markdown_links(
                path,
                &source_id,
                source_kind,
                line,
                &mut linked,
                &mut relations,
            );
            self.collect_wiki_links(&source_id, source_kind, line, &mut linked, &mut relations);
        }
        self.collect_mentions(&content, &source_id, source_kind, &linked, &mut relations);

        Ok(relations)
    }

    /// Analyze every registered document. Per-file failures are logged and
    /// skipped so one unreadable file cannot sink a corpus-wide run.
    pub fn analyze_all(&self) -> Result<Vec<Relation>> {
        let targets: Vec<PathBuf> = {
            let store = self.store.read();
            store
                .registry()
                .iter()
                .map(|(_, path)| path.to_path_buf())
                .collect()
        };

        let mut relations = Vec::new();
        for path in targets {
            match self.analyze(&path) {
                Ok(mut batch) => relations.append(&mut batch),
                Err(error) => {
                    warn!(file = %path.display(), error = %error, "relation analysis skipped");
                }
            }
        }
        Ok(relations)
    }

    /// Extension point for similarity-driven discovery. Returns an empty
    /// list until a similarity backend exists; callers must not assume
    /// this ever populates.
    pub fn similar_content_relations(&self, _path: &Path) -> Vec<Relation> {
        Vec::new()
    }

    /// Extension point for temporal relation discovery (continuations,
    /// supersessions inferred from edit history). Same contract as
    /// [`similar_content_relations`](Self::similar_content_relations).
    pub fn temporal_relations(&self, _path: &Path) -> Vec<Relation> {
        Vec::new()
    }

    // ------------------------------------------------------------------
    // Marker passes
    // ------------------------------------------------------------------

    fn collect_markdown_links(
        &self,
        source_path: &Path,
        source_id: &LogicalId,
        source_kind: DocumentKind,
        line: &str,
        linked: &mut HashSet<LogicalId>,
        out: &mut Vec<Relation>,
    ) {
        for captures in self.md_link.captures_iter(line) {
            let target = &captures[2];
            let (raw_path, fragment) = match target.split_once('#') {
                Some((path, fragment)) => (path, Some(fragment)),
                None => (target, None),
            };
            if !raw_path.ends_with(".md") {
                continue;
            }
            let base_dir = source_path.parent().unwrap_or(Path::new(""));
            let resolved = normalize_path(&base_dir.join(raw_path));
            let Some((target_id, target_kind)) = self.markdown_target(&resolved, fragment) else {
                debug!(
                    file = %source_path.display(),
                    target = %target,
                    "dangling markdown link skipped"
                );
                continue;
            };
            if target_id == *source_id {
                continue;
            }
            linked.insert(target_id.clone());
            out.push(self.relation(
                source_id.clone(),
                target_id,
                source_kind,
                target_kind,
                line,
                "markdown_link",
            ));
        }
    }

    fn collect_wiki_links(
        &self,
        source_id: &LogicalId,
        source_kind: DocumentKind,
        line: &str,
        linked: &mut HashSet<LogicalId>,
        out: &mut Vec<Relation>,
    ) {
        for captures in self.wiki_link.captures_iter(line) {
            let raw = captures[1].trim();
            let Ok(target_id) = raw.parse::<LogicalId>() else {
                continue;
            };
            let target_kind = {
                let store = self.store.read();
                let Some(target_path) = store.registry().resolve(&target_id).map(Path::to_path_buf)
                else {
                    debug!(identifier = raw, "wiki link to unregistered identifier skipped");
                    continue;
                };
                self.kind_of(&store, &target_path)
            };
            if target_id == *source_id {
                continue;
            }
            linked.insert(target_id.clone());
            out.push(self.relation(
                source_id.clone(),
                target_id,
                source_kind,
                target_kind,
                line,
                "wiki_link",
            ));
        }
    }

    fn collect_mentions(
        &self,
        content: &str,
        source_id: &LogicalId,
        source_kind: DocumentKind,
        linked: &HashSet<LogicalId>,
        out: &mut Vec<Relation>,
    ) {
        let registered: Vec<(LogicalId, PathBuf)> = {
            let store = self.store.read();
            store
                .registry()
                .iter()
                .map(|(id, path)| (id.clone(), path.to_path_buf()))
                .collect()
        };

        for (target_id, target_path) in registered {
            if target_id == *source_id || linked.contains(&target_id) {
                continue;
            }
            let Some(line) = content
                .lines()
                .find(|line| mentions_identifier(line, target_id.as_str()))
            else {
                continue;
            };
            let target_kind = {
                let store = self.store.read();
                self.kind_of(&store, &target_path)
            };
            out.push(self.relation(
                source_id.clone(),
                target_id,
                source_kind,
                target_kind,
                line,
                "mention",
            ));
        }
    }

    // ------------------------------------------------------------------
    // Identity and content resolution
    // ------------------------------------------------------------------

    /// Cached content and kind when the store has the document, otherwise
    /// a direct read plus classification.
    fn content_and_kind(&self, path: &Path) -> Result<(String, DocumentKind)> {
        {
            let store = self.store.read();
            if let Some(document) = store.get_document(path) {
                return Ok((document.raw_content.clone(), document.kind));
            }
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {} for relation analysis", path.display()))?;
        let kind = classify(path, Some(&content));
        Ok((content, kind))
    }

    fn identity_for(&self, path: &Path, kind: DocumentKind) -> LogicalId {
        if let Some(id) = self.store.read().registry().reverse(path) {
            return id.clone();
        }
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        LogicalId::temp(kind, &slug(stem))
    }

    /// Identity and kind for a markdown link target, or `None` when the
    /// link dangles. Registered targets keep their identifier; existing
    /// but unregistered files get a synthetic one. A `#fragment` on the
    /// link refines the identifier's subpath.
    fn markdown_target(
        &self,
        resolved: &Path,
        fragment: Option<&str>,
    ) -> Option<(LogicalId, DocumentKind)> {
        let (registered, kind) = {
            let store = self.store.read();
            let registered = store.registry().reverse(resolved).cloned();
            (registered, self.kind_of(&store, resolved))
        };

        let base = match registered {
            Some(id) => id,
            None => {
                if !resolved.exists() {
                    return None;
                }
                let stem = resolved
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or_default();
                LogicalId::temp(kind, &slug(stem))
            }
        };
        let id = match fragment {
            Some(fragment) if !fragment.is_empty() => {
                LogicalId::new(format!("{base}#{fragment}")).unwrap_or(base)
            }
            _ => base,
        };
        Some((id, kind))
    }

    fn kind_of(&self, store: &DocumentStore, path: &Path) -> DocumentKind {
        store
            .get_document(path)
            .map(|document| document.kind)
            .unwrap_or_else(|| classify(path, None))
    }

    fn relation(
        &self,
        source_id: LogicalId,
        target_id: LogicalId,
        source_kind: DocumentKind,
        target_kind: DocumentKind,
        line: &str,
        marker: &str,
    ) -> Relation {
        let relation_type = relation_type_for(source_kind, target_kind, line);
        let mut metadata = BTreeMap::new();
        metadata.insert("marker".to_string(), marker.to_string());
        metadata.insert(
            "evidence".to_string(),
            line.trim().chars().take(EVIDENCE_MAX_CHARS).collect(),
        );
        Relation {
            source_id,
            target_id,
            relation_type,
            confidence: EXPLICIT_CONFIDENCE,
            metadata,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Typing decision table
// ============================================================================

/// Default relation type from the (source, target) kind pair. Archived
/// kinds count as their live base kind.
fn kind_pair_default(source: DocumentKind, target: DocumentKind) -> RelationType {
    match (source.base(), target.base()) {
        (DocumentKind::Standard, DocumentKind::Standard) => RelationType::RelatedStandard,
        (_, DocumentKind::Standard) => RelationType::ReferencesStandard,
        (DocumentKind::Incident, DocumentKind::Task) => RelationType::RequiresTask,
        (DocumentKind::Task, DocumentKind::Incident) => RelationType::AddressesIncident,
        _ => RelationType::Mentions,
    }
}

/// Full typing decision: kind-pair default, then keyword upgrades from the
/// lowercased link line, later table entries overwriting earlier matches.
pub fn relation_type_for(source: DocumentKind, target: DocumentKind, line: &str) -> RelationType {
    let lowered = line.to_lowercase();
    let mut decided = kind_pair_default(source, target);
    for (markers, upgrade) in KEYWORD_RULES {
        if markers.iter().any(|marker| lowered.contains(marker)) {
            decided = *upgrade;
        }
    }
    decided
}

// ============================================================================
// Mention, path and slug helpers
// ============================================================================

/// Does `line` contain `identifier` as a standalone token? A hit is
/// rejected when either neighboring character continues the identifier,
/// so `task:a` never matches inside `task:ab`, `task:a-b` or `temp:task:a`.
fn mentions_identifier(line: &str, identifier: &str) -> bool {
    line.match_indices(identifier).any(|(start, matched)| {
        let before = line[..start].chars().next_back();
        let after = line[start + matched.len()..].chars().next();
        !continues_identifier(before) && !continues_identifier(after)
    })
}

fn continues_identifier(neighbor: Option<char>) -> bool {
    neighbor.is_some_and(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '#'))
}

/// Lexically resolve `.` and `..` components without touching the
/// filesystem. `..` past the root of a relative path is kept as-is; `..`
/// at the root of an absolute path is dropped.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(Component::ParentDir),
            },
            other => out.push(other),
        }
    }
    out
}

/// Reduce a file stem to a lowercase identifier-safe slug. Runs of
/// non-alphanumeric characters collapse to a single `-`.
fn slug(stem: &str) -> String {
    let mut out = String::new();
    for c in stem.chars().flat_map(char::to_lowercase).take(SLUG_MAX_CHARS) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}
