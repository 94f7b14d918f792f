//! Memory record - The fundamental unit of scored memory
//!
//! Content, tier, timestamp, embedding and importance are fixed at creation.
//! Only the retrieval counter and the association set change afterwards,
//! both through interior mutability so records can be shared as
//! `Arc<Memory>` between the foreground path and consolidation snapshots.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Tier;

/// A scored memory held in one tier
#[derive(Debug)]
pub struct Memory {
    /// Unique identifier (UUID v4)
    pub id: Uuid,
    /// Opaque payload
    pub content: String,
    pub tier: Tier,
    /// Creation time, never updated
    pub timestamp: DateTime<Utc>,
    pub embedding: Vec<f32>,
    /// Importance in [0, 1], never mutated
    pub importance: f64,
    associations: RwLock<BTreeSet<String>>,
    retrieval_count: AtomicU64,
}

impl Memory {
    /// Create a memory stamped with the current time
    pub fn new(content: impl Into<String>, tier: Tier, embedding: Vec<f32>, importance: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            tier,
            timestamp: Utc::now(),
            embedding,
            importance: importance.clamp(0.0, 1.0),
            associations: RwLock::new(BTreeSet::new()),
            retrieval_count: AtomicU64::new(0),
        }
    }

    /// Override the creation time
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Seed the association set
    pub fn with_associations<I, S>(self, concepts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_associations(concepts);
        self
    }

    pub fn retrieval_count(&self) -> u64 {
        self.retrieval_count.load(Ordering::Relaxed)
    }

    /// Count one selection by a retrieval query
    pub fn record_retrieval(&self) -> u64 {
        self.retrieval_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn associations(&self) -> Vec<String> {
        self.associations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn association_count(&self) -> usize {
        self.associations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn has_association(&self, concept: &str) -> bool {
        self.associations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(concept)
    }

    /// Grow the association set; returns how many concepts were new
    pub fn add_associations<I, S>(&self, concepts: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = self
            .associations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        for concept in concepts {
            if set.insert(concept.into()) {
                added += 1;
            }
        }
        added
    }

    /// Frozen copy for archival and snapshots
    pub fn to_record(&self) -> MemoryRecord {
        MemoryRecord {
            id: self.id,
            content: self.content.clone(),
            tier: self.tier,
            timestamp: self.timestamp,
            embedding: self.embedding.clone(),
            importance: self.importance,
            associations: self.associations(),
            retrieval_count: self.retrieval_count(),
        }
    }
}

impl From<MemoryRecord> for Memory {
    fn from(record: MemoryRecord) -> Self {
        Self {
            id: record.id,
            content: record.content,
            tier: record.tier,
            timestamp: record.timestamp,
            embedding: record.embedding,
            importance: record.importance.clamp(0.0, 1.0),
            associations: RwLock::new(record.associations.into_iter().collect()),
            retrieval_count: AtomicU64::new(record.retrieval_count),
        }
    }
}

/// Plain, serializable copy of a [`Memory`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: Uuid,
    pub content: String,
    pub tier: Tier,
    pub timestamp: DateTime<Utc>,
    pub embedding: Vec<f32>,
    pub importance: f64,
    pub associations: Vec<String>,
    pub retrieval_count: u64,
}
