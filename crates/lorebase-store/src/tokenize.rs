//! Corpus tokenizer, shared verbatim between indexing and querying.
//!
//! Tokenization is intentionally simple and deterministic:
//!
//! - Split on any non-alphanumeric character (Unicode-aware: the corpus is
//!   mixed Russian/English markdown).
//! - Lowercase everything.
//! - Discard tokens shorter than [`MIN_TOKEN_CHARS`] characters.
//!
//! A query tokenized here matches exactly the postings produced here; any
//! drift between the two would silently break search.

use std::collections::HashMap;

/// Minimum token length, in characters. Shorter tokens are dropped.
pub const MIN_TOKEN_CHARS: usize = 3;

/// Over-long runs are truncated at this many bytes while accumulating.
const MAX_TOKEN_BYTES: usize = 64;

/// Split `text` into index tokens, in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c.is_alphanumeric() {
            if current.len() < MAX_TOKEN_BYTES {
                for lc in c.to_lowercase() {
                    current.push(lc);
                }
            }
            continue;
        }

        if !current.is_empty() {
            push_token(&mut tokens, &mut current);
        }
    }

    if !current.is_empty() {
        push_token(&mut tokens, &mut current);
    }

    tokens
}

/// Tokenize and accumulate per-token counts.
pub fn term_frequencies(text: &str) -> HashMap<String, u32> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

fn push_token(tokens: &mut Vec<String>, current: &mut String) {
    if current.chars().count() >= MIN_TOKEN_CHARS {
        tokens.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_word_boundaries_and_lowercases() {
        assert_eq!(
            tokenize("Incident: DNS timeout (prod)"),
            vec!["incident", "dns", "timeout", "prod"]
        );
    }

    #[test]
    fn short_tokens_are_dropped() {
        // "a", "of", "12" are all below the three-character minimum.
        assert_eq!(tokenize("a of 12 abc"), vec!["abc"]);
    }

    #[test]
    fn cyrillic_text_tokenizes() {
        assert_eq!(
            tokenize("## 🎯 Цель процесса"),
            vec!["цель", "процесса"]
        );
    }

    #[test]
    fn frequencies_accumulate_per_token() {
        let counts = term_frequencies("alpha beta alpha ALPHA");
        assert_eq!(counts.get("alpha"), Some(&3));
        assert_eq!(counts.get("beta"), Some(&1));
    }

    #[test]
    fn empty_and_punctuation_only_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("--- ## ()!?").is_empty());
    }
}
