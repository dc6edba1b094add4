//! Lexical retrievers over the chunk corpus.

use super::Retriever;
use crate::retrieval::dense::top_k;
use async_trait::async_trait;
use modrag_core::{AppError, AppResult, Params};
use modrag_knowledge::text::tokenize;
use modrag_knowledge::Document;
use regex::Regex;
use std::collections::HashMap;

const BM25_K1: f32 = 1.5;
const BM25_B: f32 = 0.75;

/// Stable descending sort by score, then the top `k` documents with the
/// score recorded under `key`.
fn rank_by(scores: Vec<f32>, corpus: &[Document], k: usize, key: &str) -> Vec<Document> {
    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
        .into_iter()
        .take(k)
        .map(|(i, score)| {
            let mut document = corpus[i].clone();
            document.set_meta(key, score);
            document
        })
        .collect()
}

fn require_corpus(documents: &[Document], strategy: &str) -> AppResult<()> {
    if documents.is_empty() {
        return Err(AppError::Retrieval(format!(
            "{} retriever needs a non-empty document corpus",
            strategy
        )));
    }
    Ok(())
}

/// Okapi BM25.
pub struct Bm25Retriever {
    corpus: Vec<Document>,
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avgdl: f32,
    k: usize,
}

impl Bm25Retriever {
    pub fn new(documents: Vec<Document>, params: &Params) -> AppResult<Self> {
        require_corpus(&documents, "bm25")?;

        let mut term_freqs = Vec::with_capacity(documents.len());
        let mut doc_lens = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for document in &documents {
            let tokens = tokenize(&document.content);
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in tokens.iter() {
                *tf.entry(token.clone()).or_default() += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }
            doc_lens.push(tokens.len());
            term_freqs.push(tf);
        }

        let avgdl = doc_lens.iter().sum::<usize>() as f32 / documents.len() as f32;
        tracing::debug!("BM25 index over {} documents (avgdl {:.1})", documents.len(), avgdl);

        Ok(Self {
            corpus: documents,
            term_freqs,
            doc_lens,
            doc_freq,
            avgdl,
            k: top_k(params, 5),
        })
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.corpus.len() as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// BM25 score of every corpus document for `query`.
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let terms = tokenize(query);
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };

        self.term_freqs
            .iter()
            .zip(&self.doc_lens)
            .map(|(tf, &len)| {
                terms
                    .iter()
                    .map(|term| {
                        let f = tf.get(term).copied().unwrap_or(0) as f32;
                        if f == 0.0 {
                            return 0.0;
                        }
                        let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len as f32 / avgdl);
                        self.idf(term) * f * (BM25_K1 + 1.0) / (f + norm)
                    })
                    .sum()
            })
            .collect()
    }
}

#[async_trait]
impl Retriever for Bm25Retriever {
    fn name(&self) -> &str {
        "bm25"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        Ok(rank_by(self.scores(query), &self.corpus, self.k, "bm25_score"))
    }
}

/// TF-IDF vectors with cosine ranking.
pub struct TfidfRetriever {
    corpus: Vec<Document>,
    idf: HashMap<String, f32>,
    vectors: Vec<HashMap<String, f32>>,
    k: usize,
}

impl TfidfRetriever {
    pub fn new(documents: Vec<Document>, params: &Params) -> AppResult<Self> {
        require_corpus(&documents, "tfidf")?;

        let counts: Vec<HashMap<String, f32>> = documents
            .iter()
            .map(|d| term_counts(&d.content))
            .collect();

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for tf in &counts {
            for term in tf.keys() {
                *doc_freq.entry(term.as_str()).or_default() += 1;
            }
        }

        let n = documents.len() as f32;
        let idf: HashMap<String, f32> = doc_freq
            .into_iter()
            .map(|(term, df)| (term.to_string(), ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0))
            .collect();

        let vectors = counts.into_iter().map(|tf| weigh(tf, &idf)).collect();

        Ok(Self {
            corpus: documents,
            idf,
            vectors,
            k: top_k(params, 5),
        })
    }
}

fn term_counts(text: &str) -> HashMap<String, f32> {
    let mut counts = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }
    counts
}

/// Weight term counts by idf (unknown terms dropped) and L2-normalise.
fn weigh(counts: HashMap<String, f32>, idf: &HashMap<String, f32>) -> HashMap<String, f32> {
    let mut vector: HashMap<String, f32> = counts
        .into_iter()
        .filter_map(|(term, count)| idf.get(&term).map(|w| (term, count * w)))
        .collect();
    let norm = vector.values().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.values_mut().for_each(|v| *v /= norm);
    }
    vector
}

#[async_trait]
impl Retriever for TfidfRetriever {
    fn name(&self) -> &str {
        "tfidf"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let query_vector = weigh(term_counts(query), &self.idf);
        let scores = self
            .vectors
            .iter()
            .map(|v| {
                query_vector
                    .iter()
                    .map(|(term, w)| w * v.get(term).copied().unwrap_or(0.0))
                    .sum()
            })
            .collect();
        Ok(rank_by(scores, &self.corpus, self.k, "tfidf_score"))
    }
}

/// Substring match on whitespace-separated keywords.
pub struct KeywordRetriever {
    corpus: Vec<Document>,
    k: usize,
    case_sensitive: bool,
    match_all: bool,
}

impl KeywordRetriever {
    pub fn new(documents: Vec<Document>, params: &Params) -> Self {
        Self {
            corpus: documents,
            k: top_k(params, 5),
            case_sensitive: params.bool_or("case_sensitive", false),
            match_all: params.str_or("match_mode", "any") == "all",
        }
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let normalize = |text: &str| {
            if self.case_sensitive {
                text.to_string()
            } else {
                text.to_lowercase()
            }
        };
        let query = normalize(query);
        // An empty keyword list matches nothing in `any` mode and everything in `all` mode.
        let keywords: Vec<&str> = query.split_whitespace().collect();

        let mut results = Vec::new();
        for document in &self.corpus {
            let content = normalize(&document.content);
            let matched = if self.match_all {
                keywords.iter().all(|k| content.contains(k))
            } else {
                keywords.iter().any(|k| content.contains(k))
            };
            if matched {
                results.push(document.clone());
                if results.len() >= self.k {
                    break;
                }
            }
        }
        Ok(results)
    }
}

/// Treats the query as a regular expression.
pub struct RegexRetriever {
    corpus: Vec<Document>,
    k: usize,
}

impl RegexRetriever {
    pub fn new(documents: Vec<Document>, params: &Params) -> Self {
        Self {
            corpus: documents,
            k: top_k(params, 5),
        }
    }
}

#[async_trait]
impl Retriever for RegexRetriever {
    fn name(&self) -> &str {
        "regex"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let pattern = match Regex::new(query) {
            Ok(pattern) => pattern,
            Err(e) => {
                tracing::warn!("Invalid regex '{}': {}", query, e);
                return Ok(Vec::new());
            }
        };

        Ok(self
            .corpus
            .iter()
            .filter(|d| pattern.is_match(&d.content))
            .take(self.k)
            .cloned()
            .collect())
    }
}
