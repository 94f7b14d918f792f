//! Test Data Factory
//!
//! Provides utilities for generating realistic test data:
//! - Tagged inputs whose concepts the tests control
//! - A repeating day of activity for pattern extraction
//! - Raw memory records for snapshot tests

use chrono::{Duration, Utc};
use somnia_core::{MemoryRecord, Tier};
use uuid::Uuid;

/// Concepts of [`TestDataFactory::busy_day`], in daily order
pub const DAY_CONCEPTS: [&str; 6] = ["wake", "coffee", "email", "standup", "lunch", "gym"];

/// Factory for creating test data
///
/// # Example
///
/// ```rust,ignore
/// for text in TestDataFactory::busy_day() {
///     harness.process(&text).await;
/// }
/// ```
pub struct TestDataFactory;

impl TestDataFactory {
    /// One input carrying a single `#concept` tag
    pub fn tagged(concept: &str, n: usize) -> String {
        format!("entry {} about #{}", n, concept)
    }

    /// Three passes over [`DAY_CONCEPTS`], 18 inputs
    pub fn busy_day() -> Vec<String> {
        (0..3)
            .flat_map(|round| {
                DAY_CONCEPTS
                    .iter()
                    .enumerate()
                    .map(move |(i, c)| Self::tagged(c, round * DAY_CONCEPTS.len() + i))
            })
            .collect()
    }

    /// `n` distinct untagged inputs
    pub fn chatter(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("note number {} with token t{} and marker m{}", i, i, i % 7))
            .collect()
    }

    /// A persisted memory record with a unit embedding
    pub fn record(tier: Tier, content: &str, dimension: usize) -> MemoryRecord {
        let mut embedding = vec![0.0; dimension];
        if let Some(first) = embedding.first_mut() {
            *first = 1.0;
        }
        MemoryRecord {
            id: Uuid::new_v4(),
            content: content.to_string(),
            tier,
            timestamp: Utc::now() - Duration::hours(1),
            embedding,
            importance: 0.5,
            associations: Vec::new(),
            retrieval_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_day_cycles_concepts() {
        let day = TestDataFactory::busy_day();
        assert_eq!(day.len(), 18);
        assert!(day[0].ends_with("#wake"));
        assert!(day[6].ends_with("#wake"));
        assert!(day[17].ends_with("#gym"));
    }

    #[test]
    fn test_chatter_is_distinct() {
        let chatter = TestDataFactory::chatter(20);
        let mut deduped = chatter.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), 20);
    }
}
