use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::corpus::Corpus;
use crate::stopwords::is_stop_word;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoredDocument {
    pub index: usize,
    pub score: f64,
}

/// Sparse, L2-normalized tf-idf vector; entries sorted by term id.
#[derive(Debug, Clone, Default, PartialEq)]
struct SparseVector {
    entries: Vec<(usize, f64)>,
}

impl SparseVector {
    fn from_counts(counts: BTreeMap<usize, f64>, idf: &[f64]) -> Self {
        let mut entries = counts
            .into_iter()
            .map(|(term, count)| (term, count * idf[term]))
            .collect::<Vec<_>>();
        let norm = entries.iter().map(|(_, weight)| weight * weight).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, weight) in &mut entries {
                *weight /= norm;
            }
        }
        Self { entries }
    }

    fn dot(&self, other: &Self) -> f64 {
        let (mut lhs, mut rhs) = (0, 0);
        let mut total = 0.0;
        while lhs < self.entries.len() && rhs < other.entries.len() {
            let (left_term, left_weight) = self.entries[lhs];
            let (right_term, right_weight) = other.entries[rhs];
            match left_term.cmp(&right_term) {
                Ordering::Less => lhs += 1,
                Ordering::Greater => rhs += 1,
                Ordering::Equal => {
                    total += left_weight * right_weight;
                    lhs += 1;
                    rhs += 1;
                }
            }
        }
        total
    }
}

/// Fixed-vocabulary tf-idf index over the corpus documents.
///
/// The vocabulary and idf weights are learned once in [`SimilarityIndex::build`];
/// queries never grow the vocabulary, so unknown terms carry no weight. The index is
/// read-only after construction and can be shared across threads freely.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    documents: Vec<SparseVector>,
}

impl SimilarityIndex {
    #[must_use]
    pub fn build<S: AsRef<str>>(documents: &[S]) -> Self {
        let tokenized = documents.iter().map(|document| tokenize(document.as_ref())).collect::<Vec<_>>();

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut document_frequency: Vec<usize> = Vec::new();
        for tokens in &tokenized {
            let mut seen = tokens.clone();
            seen.sort_unstable();
            seen.dedup();
            // Term ids follow first appearance so construction stays deterministic.
            for token in tokens {
                if !vocabulary.contains_key(token) {
                    vocabulary.insert(token.clone(), vocabulary.len());
                    document_frequency.push(0);
                }
            }
            for token in seen {
                if let Some(&term) = vocabulary.get(&token) {
                    document_frequency[term] += 1;
                }
            }
        }

        // Smoothed idf: ln((1 + n) / (1 + df)) + 1.
        let n = usize_to_f64(documents.len());
        let idf = document_frequency
            .iter()
            .map(|df| ((1.0 + n) / (1.0 + usize_to_f64(*df))).ln() + 1.0)
            .collect::<Vec<_>>();

        let vectors = tokenized
            .iter()
            .map(|tokens| SparseVector::from_counts(term_counts(tokens, &vocabulary), &idf))
            .collect();

        Self { vocabulary, idf, documents: vectors }
    }

    #[must_use]
    pub fn from_corpus(corpus: &Corpus) -> Self {
        let documents = corpus.documents().collect::<Vec<_>>();
        Self::build(&documents)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[must_use]
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// Score every document by cosine similarity to `query` and return the best `top_k`.
    ///
    /// Results are sorted by descending score; equal scores keep corpus order. The
    /// result length is `min(top_k, len())`. An empty or out-of-vocabulary query
    /// scores every document as zero.
    #[must_use]
    pub fn rank(&self, query: &str, top_k: usize) -> Vec<ScoredDocument> {
        let query_vector = self.vectorize(query);
        let mut scored = self
            .documents
            .iter()
            .enumerate()
            .map(|(index, document)| ScoredDocument { index, score: query_vector.dot(document) })
            .collect::<Vec<_>>();
        scored.sort_by(|lhs, rhs| rhs.score.partial_cmp(&lhs.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k.min(self.documents.len()));
        scored
    }

    fn vectorize(&self, text: &str) -> SparseVector {
        SparseVector::from_counts(term_counts(&tokenize(text), &self.vocabulary), &self.idf)
    }
}

fn term_counts(tokens: &[String], vocabulary: &HashMap<String, usize>) -> BTreeMap<usize, f64> {
    let mut counts = BTreeMap::new();
    for token in tokens {
        if let Some(&term) = vocabulary.get(token) {
            *counts.entry(term).or_insert(0.0) += 1.0;
        }
    }
    counts
}

/// Lowercase, split on non-word characters, keep terms of two or more characters
/// that are not stop words.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .filter(|term| term.chars().count() >= 2)
        .filter(|term| !is_stop_word(term))
        .map(str::to_string)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn usize_to_f64(value: usize) -> f64 {
    value as f64
}
