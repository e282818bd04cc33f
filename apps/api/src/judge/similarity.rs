//! Text similarity for the judge: cosine over token-frequency vectors.
//!
//! Symmetric and in [0, 1] (frequencies are non-negative). Identical texts
//! score exactly 1.0.

use std::collections::HashMap;

/// Tokens shorter than this carry little signal ("de", "en", "is").
const MIN_TOKEN_CHARS: usize = 3;

/// Lower-cased alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
}

/// Term-frequency vector of one text, with its norm precomputed so a target
/// can be compared against a whole history cheaply.
#[derive(Debug, Clone)]
pub struct TermVector {
    source: String,
    counts: HashMap<String, f64>,
    norm: f64,
}

impl TermVector {
    pub fn new(text: &str) -> Self {
        let mut counts: HashMap<String, f64> = HashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_default() += 1.0;
        }
        let norm = counts.values().map(|c| c * c).sum::<f64>().sqrt();
        Self {
            source: text.trim().to_string(),
            counts,
            norm,
        }
    }

    pub fn cosine(&self, other: &TermVector) -> f64 {
        if self.source == other.source {
            return 1.0;
        }
        if self.norm == 0.0 || other.norm == 0.0 {
            return 0.0;
        }
        // Iterate the smaller map; the dot product is the same either way.
        let (small, large) = if self.counts.len() <= other.counts.len() {
            (&self.counts, &other.counts)
        } else {
            (&other.counts, &self.counts)
        };
        let dot: f64 = small
            .iter()
            .filter_map(|(token, a)| large.get(token).map(|b| a * b))
            .sum();
        (dot / (self.norm * other.norm)).clamp(0.0, 1.0)
    }
}
