//! Spanish lexical search: tokenisation, stemming, stopword removal, and a
//! BM25-ranked in-memory inverted index.
//!
//! The `ChunkStore` trait is language-agnostic (spec §9 open question); this
//! module is where the reference implementation fixes Spanish as the
//! lexical-search language, via `rust-stemmers`' Snowball Spanish algorithm
//! and the `stop-words` crate's Spanish list.

use crate::ChunkId;
use parking_lot::RwLock;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// Splits text into lowercase, accent-folded, stemmed tokens with Spanish
/// stopwords removed. Used both to build the inverted index (over
/// `label ⊕ text`) and to tokenise incoming queries.
pub struct SpanishTokenizer {
    stemmer: Stemmer,
    stopwords: HashSet<String>,
}

impl SpanishTokenizer {
    pub fn new() -> Self {
        let stopwords = stop_words::get(stop_words::LANGUAGE::Spanish)
            .into_iter()
            .map(|w| fold_accents(&w))
            .collect();
        Self {
            stemmer: Stemmer::create(Algorithm::Spanish),
            stopwords,
        }
    }

    /// Tokenise, fold accents, lowercase, drop stopwords, and stem.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| fold_accents(s))
            .filter(|s| !self.stopwords.contains(s) && s.len() > 1)
            .map(|s| self.stemmer.stem(&s).into_owned())
            .collect()
    }
}

impl Default for SpanishTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercases and strips diacritics via NFD decomposition, matching the
/// accent-insensitive matching the intent classifier also relies on.
pub fn fold_accents(s: &str) -> String {
    s.nfd()
        .filter(|c| !matches!(*c as u32, 0x0300..=0x036f))
        .collect::<String>()
        .to_lowercase()
}

/// A single posting: term frequency within one chunk's lexical text.
#[derive(Debug, Clone, Default)]
struct Postings {
    term_freq: HashMap<ChunkId, u32>,
}

/// In-memory BM25 inverted index over chunk `lexical_text` fields.
///
/// Rebuilt from the store's persisted chunks at startup and maintained
/// incrementally by `index_chunk`/`remove_document`, mirroring the
/// reference project's separation between a `StorageManager` (durable) and
/// a standalone index structure it does not itself persist.
pub struct InvertedIndex {
    tokenizer: SpanishTokenizer,
    inner: RwLock<InvertedIndexInner>,
}

#[derive(Default)]
struct InvertedIndexInner {
    postings: HashMap<String, Postings>,
    doc_len: HashMap<ChunkId, usize>,
    doc_text: HashMap<ChunkId, String>,
    total_len: u64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self {
            tokenizer: SpanishTokenizer::new(),
            inner: RwLock::new(InvertedIndexInner::default()),
        }
    }

    fn doc_count(inner: &InvertedIndexInner) -> usize {
        inner.doc_len.len()
    }

    fn avg_doc_len(inner: &InvertedIndexInner) -> f32 {
        let n = Self::doc_count(inner);
        if n == 0 {
            0.0
        } else {
            inner.total_len as f32 / n as f32
        }
    }

    /// Indexes (or re-indexes) one chunk's lexical text.
    pub fn index_chunk(&self, chunk_id: ChunkId, lexical_text: &str) {
        let tokens = self.tokenizer.tokenize(lexical_text);
        let mut inner = self.inner.write();

        self.remove_chunk_locked(&mut inner, chunk_id);

        let mut freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *freqs.entry(token.clone()).or_insert(0) += 1;
        }

        inner.total_len += tokens.len() as u64;
        inner.doc_len.insert(chunk_id, tokens.len());
        inner
            .doc_text
            .insert(chunk_id, lexical_text.to_lowercase());

        for (term, freq) in freqs {
            inner
                .postings
                .entry(term)
                .or_default()
                .term_freq
                .insert(chunk_id, freq);
        }
    }

    pub fn remove_chunk(&self, chunk_id: ChunkId) {
        let mut inner = self.inner.write();
        self.remove_chunk_locked(&mut inner, chunk_id);
    }

    fn remove_chunk_locked(&self, inner: &mut InvertedIndexInner, chunk_id: ChunkId) {
        if let Some(len) = inner.doc_len.remove(&chunk_id) {
            inner.total_len = inner.total_len.saturating_sub(len as u64);
        }
        inner.doc_text.remove(&chunk_id);
        for postings in inner.postings.values_mut() {
            postings.term_freq.remove(&chunk_id);
        }
    }

    /// Ranked BM25 search restricted to `candidates` (already metadata-filtered
    /// by the caller). Supports a simple `+required` / `-excluded` boolean
    /// prefix and literal `"phrase"` substring matching on top of the
    /// bag-of-words score, per spec §4.1 "supports phrase and boolean operators".
    pub fn search(&self, query: &str, candidates: &HashSet<ChunkId>) -> Vec<(ChunkId, f32)> {
        let inner = self.inner.read();
        if candidates.is_empty() || Self::doc_count(&inner) == 0 {
            return Vec::new();
        }

        let (required, excluded, phrases, free_terms) = parse_query_operators(query);
        let query_tokens: Vec<String> = free_terms
            .iter()
            .flat_map(|t| self.tokenizer.tokenize(t))
            .collect();
        let required_tokens: Vec<String> = required
            .iter()
            .flat_map(|t| self.tokenizer.tokenize(t))
            .collect();
        let excluded_tokens: HashSet<String> = excluded
            .iter()
            .flat_map(|t| self.tokenizer.tokenize(t))
            .collect();

        let avg_len = Self::avg_doc_len(&inner);
        let n = Self::doc_count(&inner) as f32;

        let mut scores: HashMap<ChunkId, f32> = HashMap::new();

        for token in query_tokens.iter().chain(required_tokens.iter()) {
            let Some(postings) = inner.postings.get(token) else {
                continue;
            };
            let df = postings.term_freq.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (&chunk_id, &tf) in &postings.term_freq {
                if !candidates.contains(&chunk_id) {
                    continue;
                }
                let doc_len = *inner.doc_len.get(&chunk_id).unwrap_or(&0) as f32;
                let tf = tf as f32;
                let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len.max(1.0));
                let score = idf * (tf * (BM25_K1 + 1.0)) / denom.max(1e-6);
                *scores.entry(chunk_id).or_insert(0.0) += score;
            }
        }

        // Enforce required terms: a candidate missing any +required term is dropped.
        if !required_tokens.is_empty() {
            scores.retain(|chunk_id, _| {
                required_tokens.iter().all(|t| {
                    inner
                        .postings
                        .get(t)
                        .map(|p| p.term_freq.contains_key(chunk_id))
                        .unwrap_or(false)
                })
            });
        }

        // Enforce exclusions.
        if !excluded_tokens.is_empty() {
            scores.retain(|chunk_id, _| {
                !excluded_tokens.iter().any(|t| {
                    inner
                        .postings
                        .get(t)
                        .map(|p| p.term_freq.contains_key(chunk_id))
                        .unwrap_or(false)
                })
            });
        }

        // Enforce phrase matches as a literal substring check on the raw text.
        if !phrases.is_empty() {
            scores.retain(|chunk_id, _| {
                let Some(text) = inner.doc_text.get(chunk_id) else {
                    return false;
                };
                phrases.iter().all(|p| text.contains(&p.to_lowercase()))
            });
        }

        let mut results: Vec<(ChunkId, f32)> = scores.into_iter().filter(|(_, s)| *s > 0.0).collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results
    }
}

impl Default for InvertedIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a raw query into `(required, excluded, phrases, free_terms)`.
fn parse_query_operators(query: &str) -> (Vec<String>, Vec<String>, Vec<String>, Vec<String>) {
    let mut required = Vec::new();
    let mut excluded = Vec::new();
    let mut phrases = Vec::new();
    let mut free = Vec::new();

    let mut chars = query.chars().peekable();
    let mut buf = String::new();
    let mut in_phrase = false;

    let flush = |buf: &mut String,
                 required: &mut Vec<String>,
                 excluded: &mut Vec<String>,
                 free: &mut Vec<String>| {
        if buf.is_empty() {
            return;
        }
        if let Some(stripped) = buf.strip_prefix('+') {
            required.push(stripped.to_string());
        } else if let Some(stripped) = buf.strip_prefix('-') {
            excluded.push(stripped.to_string());
        } else {
            free.push(buf.clone());
        }
        buf.clear();
    };

    while let Some(c) = chars.next() {
        if c == '"' {
            if in_phrase {
                phrases.push(buf.clone());
                buf.clear();
                in_phrase = false;
            } else {
                flush(&mut buf, &mut required, &mut excluded, &mut free);
                in_phrase = true;
            }
        } else if c.is_whitespace() && !in_phrase {
            flush(&mut buf, &mut required, &mut excluded, &mut free);
        } else {
            buf.push(c);
        }
    }
    flush(&mut buf, &mut required, &mut excluded, &mut free);

    (required, excluded, phrases, free)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn tokenizer_strips_stopwords_and_stems() {
        let tokenizer = SpanishTokenizer::new();
        let tokens = tokenizer.tokenize("los gastos deducibles de la actividad");
        assert!(!tokens.iter().any(|t| t == "los" || t == "de" || t == "la"));
        assert!(tokens.iter().any(|t| t.starts_with("deduc")));
    }

    #[test]
    fn index_and_search_ranks_matching_chunk_first() {
        let index = InvertedIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.index_chunk(a, "Artículo 30 gastos deducibles de la actividad artística");
        index.index_chunk(b, "Artículo 5 disposiciones generales sobre régimen fiscal");

        let candidates: HashSet<ChunkId> = [a, b].into_iter().collect();
        let results = index.search("gastos deducibles", &candidates);
        assert!(!results.is_empty());
        assert_eq!(results[0].0, a);
    }

    #[test]
    fn required_operator_filters_out_non_matching_chunks() {
        let index = InvertedIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.index_chunk(a, "gastos deducibles de home studio");
        index.index_chunk(b, "requisitos de subvenciones culturales");

        let candidates: HashSet<ChunkId> = [a, b].into_iter().collect();
        let results = index.search("+deducibles", &candidates);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, a);
    }

    #[test]
    fn empty_query_on_empty_index_is_well_defined() {
        let index = InvertedIndex::new();
        let results = index.search("", &HashSet::new());
        assert!(results.is_empty());
    }
}
