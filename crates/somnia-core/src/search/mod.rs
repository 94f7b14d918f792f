//! Search Module
//!
//! Relevance-ranked retrieval over the memory tiers:
//! - Cosine similarity between fixed-dimension embeddings
//! - Per-tier top-K by `similarity * importance`
//! - LRU cache of query embeddings

mod relevance;

pub use relevance::{RelevanceIndex, ScoredMemory, cosine_similarity};
