//! Keyword source: in-memory inverted index scored with Okapi BM25.
//!
//! Tokenisation splits camelCase boundaries, lowercases, strips non-word
//! characters, and drops tokens shorter than two characters. Expansion terms
//! from the query processor are OR-joined into the term set.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{ChunkMetadata, ContextChunk, SourceKind};

use super::{ContextSource, Retrieval, SourceError, SourceQuery};

const BM25_K1: f32 = 1.5;
const BM25_B: f32 = 0.75;
const MIN_TOKEN_LEN: usize = 2;

/// Splits text into BM25 terms: camelCase boundaries, lowercase, word chars
/// only, minimum length two.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && prev_lower {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            prev_lower = ch.is_lowercase() || ch.is_numeric();
            current.push(ch);
        } else {
            prev_lower = false;
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
        .into_iter()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= MIN_TOKEN_LEN)
        .collect()
}

/// A document registered in the index.
#[derive(Clone, Debug)]
pub struct KeywordDocument {
    pub id: String,
    pub content: String,
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

#[derive(Default)]
struct IndexInner {
    /// term → (doc id → term frequency)
    postings: HashMap<String, HashMap<String, u32>>,
    doc_len: HashMap<String, usize>,
    docs: HashMap<String, KeywordDocument>,
    total_len: usize,
}

impl IndexInner {
    fn avgdl(&self) -> f32 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_len as f32 / self.docs.len() as f32
        }
    }
}

/// In-memory inverted index with Okapi BM25 scoring (`k1 = 1.5`, `b = 0.75`).
#[derive(Default)]
pub struct KeywordIndex {
    inner: RwLock<IndexInner>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&self, doc: KeywordDocument) {
        let terms = tokenize(&doc.content);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        // Re-adding a document replaces it.
        if inner.docs.contains_key(&doc.id) {
            Self::remove_locked(&mut inner, &doc.id);
        }
        inner.total_len += terms.len();
        inner.doc_len.insert(doc.id.clone(), terms.len());
        for term in terms {
            *inner
                .postings
                .entry(term)
                .or_default()
                .entry(doc.id.clone())
                .or_insert(0) += 1;
        }
        inner.docs.insert(doc.id.clone(), doc);
    }

    fn remove_locked(inner: &mut IndexInner, id: &str) {
        if let Some(len) = inner.doc_len.remove(id) {
            inner.total_len -= len;
        }
        inner.docs.remove(id);
        inner.postings.retain(|_, docs| {
            docs.remove(id);
            !docs.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .docs
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// BM25 scores for the term set, best first. Scores are raw (unbounded);
    /// the source normalizes them into relevance.
    pub fn search(&self, terms: &[String], limit: usize) -> Vec<(KeywordDocument, f32)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let n = inner.docs.len() as f32;
        if n == 0.0 {
            return Vec::new();
        }
        let avgdl = inner.avgdl();
        let mut scores: HashMap<&str, f32> = HashMap::new();
        for term in terms {
            let Some(postings) = inner.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (doc_id, tf) in postings {
                let dl = *inner.doc_len.get(doc_id).unwrap_or(&0) as f32;
                let tf = *tf as f32;
                let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avgdl.max(1.0));
                *scores.entry(doc_id.as_str()).or_insert(0.0) +=
                    idf * tf * (BM25_K1 + 1.0) / denom;
            }
        }
        let mut ranked: Vec<(KeywordDocument, f32)> = scores
            .into_iter()
            .filter_map(|(id, score)| inner.docs.get(id).map(|d| (d.clone(), score)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        ranked.truncate(limit);
        ranked
    }
}

/// Keyword/BM25 retrieval source over a shared [`KeywordIndex`].
pub struct KeywordSource {
    index: std::sync::Arc<KeywordIndex>,
}

impl KeywordSource {
    pub fn new(index: std::sync::Arc<KeywordIndex>) -> Self {
        Self { index }
    }

    fn passes_filters(doc: &KeywordDocument, query: &SourceQuery) -> bool {
        let filters = &query.filters;
        if !filters.file_paths.is_empty() {
            let Some(path) = &doc.file_path else {
                return false;
            };
            if !filters.file_paths.iter().any(|p| path.contains(p.as_str())) {
                return false;
            }
        }
        if !filters.languages.is_empty() {
            let Some(lang) = &doc.language else {
                return false;
            };
            if !filters
                .languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(lang))
            {
                return false;
            }
        }
        if let Some(after) = filters.modified_after {
            match doc.modified_at {
                Some(at) if at >= after => {}
                _ => return false,
            }
        }
        true
    }
}

#[async_trait]
impl ContextSource for KeywordSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Keyword
    }

    fn name(&self) -> &str {
        "keyword"
    }

    async fn is_available(&self) -> bool {
        !self.index.is_empty()
    }

    async fn retrieve(&self, query: &SourceQuery) -> Result<Retrieval, SourceError> {
        let mut terms = tokenize(&query.text);
        for variant in &query.expanded_terms {
            terms.extend(tokenize(variant));
        }
        terms.sort();
        terms.dedup();

        // Over-fetch so post-filter still fills max_chunks where possible.
        let ranked = self.index.search(&terms, query.max_chunks * 4);
        let max_score = ranked
            .first()
            .map(|(_, s)| *s)
            .filter(|s| *s > 0.0)
            .unwrap_or(1.0);

        let chunks = ranked
            .into_iter()
            .filter(|(doc, _)| Self::passes_filters(doc, query))
            .take(query.max_chunks)
            .map(|(doc, score)| ContextChunk {
                id: doc.id.clone(),
                token_count: crate::types::estimate_tokens(&doc.content),
                relevance: (score / max_score).clamp(0.0, 1.0),
                source: SourceKind::Keyword,
                metadata: ChunkMetadata {
                    file_path: doc.file_path,
                    start_line: doc.start_line,
                    end_line: doc.end_line,
                    language: doc.language,
                    date: doc.modified_at,
                    ..Default::default()
                },
                content: doc.content,
                embedding: None,
            })
            .collect();
        Ok(Retrieval {
            chunks,
            cache_hit: false,
        })
    }
}
