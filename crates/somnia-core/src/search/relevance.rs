//! Relevance index
//!
//! Wraps the embedding collaborator and answers top-K retrieval queries per
//! tier. Holds no memory state of its own: every query works on tier
//! snapshots borrowed from the [`MemoryStore`].

use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;

use crate::collaborators::Embedder;
use crate::config::RetrievalConfig;
use crate::error::{MemoryError, Result};
use crate::memory::{Memory, MemoryStore, Tier};

/// Query embeddings kept in the LRU cache
const QUERY_CACHE_CAPACITY: usize = 100;

/// Cosine similarity between two equal-length vectors, in [-1, 1].
///
/// Zero vectors have similarity 0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(MemoryError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        Ok((dot_product / denominator).clamp(-1.0, 1.0))
    } else {
        Ok(0.0)
    }
}

/// A memory with its relevance to a query
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Arc<Memory>,
    pub similarity: f32,
    /// `similarity * importance`
    pub relevance: f64,
    /// Retrieval count observed when ranking
    retrievals: u64,
}

fn rank_order(a: &ScoredMemory, b: &ScoredMemory) -> Ordering {
    b.relevance
        .total_cmp(&a.relevance)
        .then_with(|| b.retrievals.cmp(&a.retrievals))
        .then_with(|| a.memory.timestamp.cmp(&b.memory.timestamp))
}

/// Embedding + similarity front end for the tiers
pub struct RelevanceIndex {
    embedder: Arc<dyn Embedder>,
    dimension: usize,
    retrieval: RetrievalConfig,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl RelevanceIndex {
    pub fn new(embedder: Arc<dyn Embedder>, dimension: usize, retrieval: RetrievalConfig) -> Self {
        let capacity = NonZeroUsize::new(QUERY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            embedder,
            dimension,
            retrieval,
            query_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed text through the collaborator, checking the configured width.
    ///
    /// A vector with NaN or infinite components counts as an unavailable
    /// embedding and is not cached.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self
            .query_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(text)
        {
            return Ok(hit.clone());
        }

        let vector = self
            .embedder
            .embed(text)
            .await
            .map_err(|e| MemoryError::EmbeddingUnavailable(e.to_string()))?;

        if vector.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if !vector.iter().all(|x| x.is_finite()) {
            return Err(MemoryError::EmbeddingUnavailable(
                "embedder returned non-finite components".into(),
            ));
        }

        self.query_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(text.to_string(), vector.clone());

        Ok(vector)
    }

    pub fn similarity(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        cosine_similarity(a, b)
    }

    /// Rank one tier against a query without side effects
    pub fn rank_tier(&self, store: &MemoryStore, tier: Tier, query: &[f32]) -> Result<Vec<ScoredMemory>> {
        let snapshot = store.snapshot(tier);
        let mut scored = Vec::with_capacity(snapshot.len());

        for memory in snapshot.iter() {
            let similarity = cosine_similarity(query, &memory.embedding)?;
            scored.push(ScoredMemory {
                relevance: similarity as f64 * memory.importance,
                similarity,
                retrievals: memory.retrieval_count(),
                memory: Arc::clone(memory),
            });
        }

        scored.sort_by(rank_order);
        Ok(scored)
    }

    /// Top memories per tier, concatenated in tier order.
    ///
    /// Every returned memory has its retrieval count incremented. Ranking
    /// completes for all tiers before any counter changes, so a dimension
    /// error leaves counts untouched.
    pub fn retrieve_relevant(&self, store: &MemoryStore, query: &[f32]) -> Result<Vec<Arc<Memory>>> {
        let mut selected = Vec::new();

        for tier in Tier::ALL {
            let top_k = self.retrieval.top_k_for(tier);
            let ranked = self.rank_tier(store, tier, query)?;
            selected.extend(ranked.into_iter().take(top_k).map(|s| s.memory));
        }

        for memory in &selected {
            memory.record_retrieval();
        }

        tracing::debug!(returned = selected.len(), "retrieved relevant memories");
        Ok(selected)
    }

    /// Memories across all tiers whose similarity to `embedding` exceeds
    /// `threshold`
    pub fn similar_memories(
        &self,
        store: &MemoryStore,
        embedding: &[f32],
        threshold: f32,
    ) -> Result<Vec<Arc<Memory>>> {
        let mut similar = Vec::new();
        for (_, snapshot) in store.snapshot_all() {
            for memory in snapshot.iter() {
                if cosine_similarity(embedding, &memory.embedding)? > threshold {
                    similar.push(Arc::clone(memory));
                }
            }
        }
        Ok(similar)
    }
}
