//! The document store: documents, inverted index and id registry under one
//! owner.
//!
//! The store is rebuilt from disk by scanning directories; nothing about the
//! document set is persisted (the registry file is the registry's own
//! concern). Scans are idempotent: a file whose mtime matches the captured
//! `last_modified` is skipped unless the scan is forced, and re-indexing a
//! changed file drops its old postings before inserting new ones.
//!
//! Documents only ever leave the store through [`DocumentStore::remove_document`],
//! which the mutation layer calls for archive moves. A scan never drops
//! documents, even ones whose files have meanwhile disappeared.

use crate::classify::classify;
use crate::index::InvertedIndex;
use crate::registry::{LogicalId, LogicalIdRegistry};
use crate::{ContentDigest, Document, DocumentKind};
use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Default cap on indexable file size.
const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// What a directory scan looks at.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Extension allow-list, lowercase, without the leading dot.
    pub extensions: Vec<String>,
    pub recursive: bool,
    /// Re-index files even when their mtime is unchanged.
    pub force: bool,
    /// Files larger than this are skipped outright.
    pub max_file_bytes: u64,
    /// Directory names pruned from the walk.
    pub exclude_dirs: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["md".to_string()],
            recursive: true,
            force: false,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            exclude_dirs: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "target".to_string(),
            ],
        }
    }
}

/// One ranked search result with document metadata attached.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: PathBuf,
    pub score: u32,
    pub kind: DocumentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Aggregate counts, computed in one pass over in-memory state.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatistics {
    pub documents: usize,
    pub by_kind: BTreeMap<DocumentKind, usize>,
    pub total_tokens: u64,
    pub distinct_words: usize,
    pub logical_ids: usize,
}

/// Owner of the document set, the inverted index and the id registry.
#[derive(Debug)]
pub struct DocumentStore {
    documents: HashMap<PathBuf, Document>,
    index: InvertedIndex,
    registry: LogicalIdRegistry,
}

impl DocumentStore {
    /// Open a store whose registry persists to `registry_file`. Never fails:
    /// registry load degrades to empty on any problem.
    pub fn open(registry_file: impl Into<PathBuf>) -> Self {
        Self {
            documents: HashMap::new(),
            index: InvertedIndex::new(),
            registry: LogicalIdRegistry::load(registry_file),
        }
    }

    // ========================================================================
    // Scanning
    // ========================================================================

    /// Walk `root` and (re)index every matching file that is new, stale or
    /// force-included. Returns the number of documents (re)indexed.
    ///
    /// Individual unreadable files are logged and skipped; only a missing
    /// root is an error.
    pub fn index_directory(&mut self, root: &Path, options: &ScanOptions) -> Result<usize> {
        ensure!(
            root.is_dir(),
            "scan root {} is not a directory",
            root.display()
        );

        let mut walker = WalkDir::new(root);
        if !options.recursive {
            walker = walker.max_depth(1);
        }

        let mut indexed = 0usize;
        for entry in walker
            .into_iter()
            .filter_entry(|entry| !is_pruned_dir(entry, &options.exclude_dirs))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !has_allowed_extension(path, &options.extensions) {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                if metadata.len() > options.max_file_bytes {
                    debug!(
                        file = %path.display(),
                        bytes = metadata.len(),
                        "skipping oversized file"
                    );
                    continue;
                }
            }
            match self.index_file(path, options.force) {
                Ok(true) => indexed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "failed to index file");
                }
            }
        }
        Ok(indexed)
    }

    /// (Re)index a single file. Returns `false` when the file was already up
    /// to date (same mtime) and `force` is off.
    pub fn index_file(&mut self, path: &Path, force: bool) -> Result<bool> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("cannot stat {}", path.display()))?;
        ensure!(metadata.is_file(), "{} is not a file", path.display());

        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        if !force {
            if let Some(existing) = self.documents.get(path) {
                if existing.last_modified == modified {
                    return Ok(false);
                }
            }
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let kind = classify(path, Some(&content));
        let document = Document::new(path.to_path_buf(), kind, content, modified);

        self.index.index_document(path, kind, &document.raw_content);
        self.documents.insert(path.to_path_buf(), document);
        Ok(true)
    }

    /// Drop a document and all of its postings. The explicit counterpart of
    /// an archive/delete mutation; scans never call this.
    pub fn remove_document(&mut self, path: &Path) -> bool {
        self.index.remove_document(path);
        self.documents.remove(path).is_some()
    }

    // ========================================================================
    // Lookups and search
    // ========================================================================

    pub fn get_document(&self, path: &Path) -> Option<&Document> {
        self.documents.get(path)
    }

    /// Resolve a logical id through the registry, then look the path up.
    pub fn get_document_by_id(&self, id: &LogicalId) -> Option<&Document> {
        let path = self.registry.resolve(id)?;
        self.documents.get(path)
    }

    /// Some indexed document, other than `exclude`, whose content digest
    /// matches. Deterministic: the lexicographically smallest path wins.
    pub fn find_by_digest(&self, digest: &ContentDigest, exclude: Option<&Path>) -> Option<&Path> {
        self.documents
            .values()
            .filter(|doc| doc.digest == *digest)
            .map(|doc| doc.path.as_path())
            .filter(|path| Some(*path) != exclude)
            .min()
    }

    /// Ranked search over the index, results decorated with kind and title.
    pub fn search(
        &self,
        query: &str,
        kind_filter: Option<DocumentKind>,
        limit: usize,
    ) -> Vec<SearchHit> {
        self.index
            .search(query, kind_filter, limit)
            .into_iter()
            .map(|scored| {
                let doc = self.documents.get(&scored.path);
                SearchHit {
                    kind: doc.map(|d| d.kind).unwrap_or(DocumentKind::Unknown),
                    title: doc.and_then(|d| d.title.clone()),
                    path: scored.path,
                    score: scored.score,
                }
            })
            .collect()
    }

    pub fn statistics(&self) -> StoreStatistics {
        let mut by_kind: BTreeMap<DocumentKind, usize> = BTreeMap::new();
        for doc in self.documents.values() {
            *by_kind.entry(doc.kind).or_insert(0) += 1;
        }
        StoreStatistics {
            documents: self.documents.len(),
            by_kind,
            total_tokens: self.index.total_tokens(),
            distinct_words: self.index.distinct_words(),
            logical_ids: self.registry.len(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn contains(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }

    /// Has the file on disk moved past the indexed snapshot? `false` for
    /// paths that were never indexed; a vanished file counts as stale.
    pub fn is_stale(&self, path: &Path) -> bool {
        let Some(document) = self.documents.get(path) else {
            return false;
        };
        match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified) != document.last_modified,
            Err(_) => true,
        }
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// All documents, in arbitrary order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn registry(&self) -> &LogicalIdRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut LogicalIdRegistry {
        &mut self.registry
    }
}

fn is_pruned_dir(entry: &DirEntry, exclude: &[String]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .map(|name| exclude.iter().any(|excluded| excluded == name))
        .unwrap_or(false)
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let extension = extension.to_lowercase();
    extensions.iter().any(|allowed| *allowed == extension)
}
