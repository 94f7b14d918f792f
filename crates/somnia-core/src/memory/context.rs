//! Context buffer
//!
//! Fixed-capacity FIFO log of raw recent interactions. Independent of the
//! scored tiers: evicted items are dropped, never archived.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw interaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ContextItem {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Lowercase word set over input, output and metadata values
    fn words(&self) -> HashSet<String> {
        let mut words = tokenize(&self.input);
        words.extend(tokenize(&self.output));
        for (key, value) in &self.metadata {
            words.extend(tokenize(key));
            match value {
                Value::String(s) => words.extend(tokenize(s)),
                other => words.extend(tokenize(&other.to_string())),
            }
        }
        words
    }
}

/// A context item with its overlap ratio against a query
#[derive(Debug, Clone)]
pub struct ScoredContext {
    pub overlap: f64,
    pub item: ContextItem,
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Share of the query's words that also appear in `text`
pub fn word_overlap(query: &str, text: &str) -> f64 {
    let query_words = tokenize(query);
    if query_words.is_empty() {
        return 0.0;
    }
    let text_words = tokenize(text);
    query_words.intersection(&text_words).count() as f64 / query_words.len() as f64
}

/// Fixed-capacity FIFO of [`ContextItem`]s
#[derive(Debug, Clone)]
pub struct ContextBuffer {
    items: VecDeque<ContextItem>,
    capacity: usize,
}

impl ContextBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an item, dropping the oldest when over capacity
    pub fn append(&mut self, item: ContextItem) -> Option<ContextItem> {
        self.items.push_back(item);
        if self.items.len() > self.capacity {
            self.items.pop_front()
        } else {
            None
        }
    }

    /// Items whose word overlap with `query` exceeds `threshold`, best first.
    ///
    /// Equal ratios are ordered most recent first.
    pub fn relevant(&self, query: &str, threshold: f64) -> Vec<ScoredContext> {
        let query_words = tokenize(query);
        if query_words.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = self
            .items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| {
                let words = item.words();
                let ratio =
                    query_words.intersection(&words).count() as f64 / query_words.len() as f64;
                (ratio > threshold).then_some((idx, ratio))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| b.0.cmp(&a.0))
        });

        scored
            .into_iter()
            .map(|(idx, overlap)| ScoredContext {
                overlap,
                item: self.items[idx].clone(),
            })
            .collect()
    }

    /// The `n` most recent items, in arrival order
    pub fn recent(&self, n: usize) -> Vec<ContextItem> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
