//! In-memory inverted index over document bodies.
//!
//! Shape: `word → ordered postings (document, term frequency)`. Documents get
//! compact `u32` ids in insertion order; postings are keyed by that id, so a
//! word's posting set can never hold two entries for one path and ranking
//! ties resolve by insertion order without extra bookkeeping.
//!
//! Re-indexing a path always removes its previous postings first. The same
//! content indexed twice therefore yields byte-identical postings, and a word
//! dropped from a document stops matching it immediately.

use crate::tokenize::term_frequencies;
use crate::DocumentKind;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Compact per-document id, assigned in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DocId(u32);

/// A ranked search result straight from the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredPath {
    pub path: PathBuf,
    /// Sum of term frequencies over the query tokens.
    pub score: u32,
}

#[derive(Debug, Clone)]
struct DocEntry {
    kind: DocumentKind,
    /// Distinct terms this document currently contributes postings for.
    terms: Vec<String>,
    /// Total stored term occurrences (sum of frequencies).
    token_count: u64,
}

/// The index proper. Owned and mutated exclusively by the document store.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    postings: HashMap<String, BTreeMap<DocId, u32>>,
    /// DocId → path, append-only; ids survive removal so re-insertion keeps
    /// a document's original position in the tie-break order.
    paths: Vec<PathBuf>,
    ids: HashMap<PathBuf, DocId>,
    docs: HashMap<DocId, DocEntry>,
    total_tokens: u64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)index one document: drop all prior postings for `path`, then
    /// insert one posting per distinct token of `content`.
    pub fn index_document(&mut self, path: &Path, kind: DocumentKind, content: &str) {
        let id = self.id_for(path);
        self.remove_by_id(id);

        let counts = term_frequencies(content);
        let mut terms = Vec::with_capacity(counts.len());
        let mut token_count = 0u64;

        for (term, tf) in counts {
            token_count += u64::from(tf);
            self.postings.entry(term.clone()).or_default().insert(id, tf);
            terms.push(term);
        }
        terms.sort_unstable();

        self.total_tokens += token_count;
        self.docs.insert(
            id,
            DocEntry {
                kind,
                terms,
                token_count,
            },
        );
    }

    /// Remove a document and all of its postings. Returns `false` if the
    /// path was never indexed.
    pub fn remove_document(&mut self, path: &Path) -> bool {
        match self.ids.get(path).copied() {
            Some(id) => self.remove_by_id(id),
            None => false,
        }
    }

    /// Ranked search: per-document sum of term frequencies over the query
    /// tokens, optionally filtered by kind, sorted by (score desc, insertion
    /// order asc), truncated to `limit`.
    ///
    /// An empty query or a query with no matches yields an empty Vec.
    pub fn search(
        &self,
        query: &str,
        kind_filter: Option<DocumentKind>,
        limit: usize,
    ) -> Vec<ScoredPath> {
        let tokens = crate::tokenize::tokenize(query);
        if tokens.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut scores: BTreeMap<DocId, u32> = BTreeMap::new();
        for token in &tokens {
            if let Some(posting) = self.postings.get(token) {
                for (&id, &tf) in posting {
                    *scores.entry(id).or_insert(0) += tf;
                }
            }
        }

        // BTreeMap iteration gives ascending DocId, so a stable sort by
        // descending score preserves insertion order among ties.
        let mut ranked: Vec<(DocId, u32)> = scores
            .into_iter()
            .filter(|(id, _)| match kind_filter {
                Some(kind) => self.docs.get(id).is_some_and(|d| d.kind == kind),
                None => true,
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(limit);

        ranked
            .into_iter()
            .map(|(id, score)| ScoredPath {
                path: self.paths[id.0 as usize].clone(),
                score,
            })
            .collect()
    }

    /// Current postings for one word, in insertion order (test/debug view).
    pub fn postings(&self, word: &str) -> Vec<(&Path, u32)> {
        match self.postings.get(word) {
            Some(posting) => posting
                .iter()
                .map(|(&id, &tf)| (self.paths[id.0 as usize].as_path(), tf))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.ids
            .get(path)
            .is_some_and(|id| self.docs.contains_key(id))
    }

    /// Number of currently indexed documents.
    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    /// Number of distinct indexed words.
    pub fn distinct_words(&self) -> usize {
        self.postings.len()
    }

    /// Total stored term occurrences across all documents.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    fn id_for(&mut self, path: &Path) -> DocId {
        if let Some(&id) = self.ids.get(path) {
            return id;
        }
        let id = DocId(self.paths.len() as u32);
        self.paths.push(path.to_path_buf());
        self.ids.insert(path.to_path_buf(), id);
        id
    }

    fn remove_by_id(&mut self, id: DocId) -> bool {
        let Some(entry) = self.docs.remove(&id) else {
            return false;
        };
        for term in &entry.terms {
            if let Some(posting) = self.postings.get_mut(term) {
                posting.remove(&id);
                if posting.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        self.total_tokens -= entry.token_count;
        true
    }
}
