//! Property tests for the tokenizer and the inverted index: search results
//! must always match a naive full-scan model, and re-indexing must never
//! leave stale state behind.

use lorebase_store::tokenize::{term_frequencies, tokenize, MIN_TOKEN_CHARS};
use lorebase_store::{DocumentKind, InvertedIndex};
use proptest::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;

/// Small bilingual vocabulary; every entry survives tokenization unchanged.
const WORDS: &[&str] = &[
    "alpha", "beta", "gamma", "delta", "quorum", "budget", "deploy", "rollback", "отчёт",
    "клиент", "план", "ретро", "стандарт", "инцидент",
];

fn word() -> impl Strategy<Value = &'static str> {
    prop::sample::select(WORDS)
}

fn content() -> impl Strategy<Value = String> {
    prop::collection::vec(word(), 0..40).prop_map(|words| words.join(" "))
}

/// A batch of (re)index operations over a handful of paths. Later entries
/// for the same path overwrite earlier ones.
fn index_ops() -> impl Strategy<Value = Vec<(usize, String)>> {
    prop::collection::vec((0usize..6, content()), 1..12)
}

fn query() -> impl Strategy<Value = String> {
    prop::collection::vec(word(), 1..4).prop_map(|words| words.join(" "))
}

fn path_for(slot: usize) -> PathBuf {
    PathBuf::from(format!("doc-{slot}.md"))
}

/// Reference model: last-written content per path, scored by a full scan.
/// Query tokens are *not* deduplicated, matching the index contract.
fn naive_scores(model: &HashMap<usize, String>, query: &str) -> HashMap<usize, u32> {
    let mut scores = HashMap::new();
    for (&slot, content) in model {
        let frequencies = term_frequencies(content);
        let score: u32 = tokenize(query)
            .iter()
            .filter_map(|token| frequencies.get(token))
            .sum();
        if score > 0 {
            scores.insert(slot, score);
        }
    }
    scores
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn tokens_are_lowercase_and_never_short(text in ".{0,200}") {
        for token in tokenize(&text) {
            prop_assert!(token.chars().count() >= MIN_TOKEN_CHARS);
            prop_assert_eq!(token.clone(), token.to_lowercase());
        }
    }

    #[test]
    fn search_matches_a_naive_full_scan(ops in index_ops(), query in query()) {
        let mut index = InvertedIndex::new();
        let mut model: HashMap<usize, String> = HashMap::new();
        for (slot, content) in &ops {
            index.index_document(&path_for(*slot), DocumentKind::Unknown, content);
            model.insert(*slot, content.clone());
        }

        let hits = index.search(&query, None, usize::MAX);
        let expected = naive_scores(&model, &query);

        prop_assert_eq!(hits.len(), expected.len());
        for hit in &hits {
            let slot: usize = hit
                .path
                .to_str()
                .and_then(|name| name.strip_prefix("doc-"))
                .and_then(|rest| rest.strip_suffix(".md"))
                .and_then(|digits| digits.parse().ok())
                .expect("hit path came from path_for");
            prop_assert_eq!(Some(&hit.score), expected.get(&slot));
        }
        // Ranked output: scores never increase.
        for pair in hits.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn reindexing_same_content_changes_nothing(content in content()) {
        let path = path_for(0);
        let mut once = InvertedIndex::new();
        once.index_document(&path, DocumentKind::Task, &content);
        let mut twice = InvertedIndex::new();
        twice.index_document(&path, DocumentKind::Task, &content);
        twice.index_document(&path, DocumentKind::Task, &content);

        prop_assert_eq!(once.document_count(), twice.document_count());
        prop_assert_eq!(once.total_tokens(), twice.total_tokens());
        prop_assert_eq!(once.distinct_words(), twice.distinct_words());
        for token in tokenize(&content) {
            prop_assert_eq!(once.postings(&token), twice.postings(&token));
        }
    }

    #[test]
    fn removed_documents_leave_no_postings(old in content(), new in content()) {
        let path = path_for(0);
        let mut index = InvertedIndex::new();
        index.index_document(&path, DocumentKind::Task, &old);
        index.index_document(&path, DocumentKind::Task, &new);

        // Every token of the old content either survives in the new content
        // or is gone from the postings entirely.
        let new_tokens = tokenize(&new);
        for token in tokenize(&old) {
            if !new_tokens.contains(&token) {
                prop_assert!(
                    index.postings(&token).is_empty(),
                    "stale posting for `{}`", token
                );
            }
        }

        index.remove_document(&path);
        prop_assert_eq!(index.total_tokens(), 0);
        prop_assert_eq!(index.distinct_words(), 0);
        prop_assert!(index.search(&new, None, 10).is_empty());
    }

    #[test]
    fn every_indexed_token_is_findable(content in content()) {
        let path = path_for(0);
        let mut index = InvertedIndex::new();
        index.index_document(&path, DocumentKind::Task, &content);

        for token in tokenize(&content) {
            let hits = index.search(&token, None, 10);
            prop_assert_eq!(hits.len(), 1);
            prop_assert_eq!(&hits[0].path, &path);
            let frequencies = term_frequencies(&content);
            prop_assert_eq!(Some(&hits[0].score), frequencies.get(&token));
        }
    }
}
