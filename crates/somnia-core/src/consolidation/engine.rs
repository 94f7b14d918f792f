//! Tier consolidation
//!
//! Re-scores a tier snapshot, keeps the best `capacity` memories and stages
//! the rest for the archive. Memories added while scoring ran are carried
//! over by [`MemoryStore::commit_consolidation`]; if that pushes the tier
//! back over capacity another pass runs.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::patterns::PatternExtractor;
use super::scoring::{ScoreInputs, consolidation_score};
use crate::classify::ConceptExtractor;
use crate::config::MemoryConfig;
use crate::memory::{Memory, MemoryStore, Tier};
use crate::storage::ArchiveStore;

/// Passes before giving up on a tier that keeps refilling
const MAX_CONSOLIDATION_PASSES: usize = 3;

/// Outcome of one `consolidate_tier` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierConsolidation {
    pub tier: Tier,
    pub before: usize,
    pub after: usize,
    /// Demoted memories, in demotion order
    pub archived: Vec<Uuid>,
    /// Memories added during scoring and carried over
    pub late_arrivals: usize,
    pub passes: usize,
    pub duration_ms: u64,
}

/// Scores, demotes and integrates memories
pub struct ConsolidationEngine {
    pub(crate) config: MemoryConfig,
    pub(crate) extractor: Arc<dyn ConceptExtractor>,
    pub(crate) patterns: PatternExtractor,
    /// Serializes consolidation per tier so a memory is demoted once
    tier_locks: [Mutex<()>; 4],
}

impl std::fmt::Debug for ConsolidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsolidationEngine")
            .field("active_memory_size", &self.config.active_memory_size)
            .finish()
    }
}

impl ConsolidationEngine {
    pub fn new(config: MemoryConfig, extractor: Arc<dyn ConceptExtractor>) -> Self {
        let patterns = PatternExtractor::new(&config.nightly);
        Self {
            config,
            extractor,
            patterns,
            tier_locks: Default::default(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn consolidate_tier(
        &self,
        store: &MemoryStore,
        archive: &ArchiveStore,
        tier: Tier,
    ) -> TierConsolidation {
        self.consolidate_tier_at(store, archive, tier, Utc::now())
    }

    /// Consolidate with an explicit clock for the recency term
    pub fn consolidate_tier_at(
        &self,
        store: &MemoryStore,
        archive: &ArchiveStore,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> TierConsolidation {
        let _serial = self.tier_locks[tier.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let start = Instant::now();
        let capacity = self.config.capacity_for(tier);

        let mut result = TierConsolidation {
            tier,
            before: store.len(tier),
            after: 0,
            archived: Vec::new(),
            late_arrivals: 0,
            passes: 0,
            duration_ms: 0,
        };

        for _ in 0..MAX_CONSOLIDATION_PASSES {
            let base = store.snapshot(tier);
            if base.len() <= capacity {
                break;
            }

            let (kept, demoted) = self.partition(&base, capacity, now);
            let late = store.commit_consolidation(tier, &base, kept);
            archive.stage(demoted.iter().map(|m| m.to_record()).collect());

            result.archived.extend(demoted.iter().map(|m| m.id));
            result.late_arrivals += late;
            result.passes += 1;
            if late == 0 {
                break;
            }
        }

        result.after = store.len(tier);
        result.duration_ms = start.elapsed().as_millis() as u64;

        if result.archived.is_empty() {
            debug!(tier = %tier, size = result.after, capacity, "Tier within capacity");
        } else {
            info!(
                tier = %tier,
                archived = result.archived.len(),
                kept = result.after,
                late_arrivals = result.late_arrivals,
                duration_ms = result.duration_ms,
                "Tier consolidated"
            );
        }
        result
    }

    /// Best `capacity` memories and the rest, both in score order
    fn partition(
        &self,
        memories: &[Arc<Memory>],
        capacity: usize,
        now: DateTime<Utc>,
    ) -> (Vec<Arc<Memory>>, Vec<Arc<Memory>>) {
        let mut scored: Vec<(f64, &Arc<Memory>)> = memories
            .iter()
            .map(|m| {
                let inputs = ScoreInputs::of(m);
                let score = consolidation_score(&inputs, &self.config.score, now);
                // an unscorable memory is the first to go
                (if score.is_finite() { score } else { f64::NEG_INFINITY }, m)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.timestamp.cmp(&b.1.timestamp))
                .then_with(|| a.1.id.cmp(&b.1.id))
        });

        let demoted = scored.split_off(capacity.min(scored.len()));
        (
            scored.into_iter().map(|(_, m)| Arc::clone(m)).collect(),
            demoted.into_iter().map(|(_, m)| Arc::clone(m)).collect(),
        )
    }
}
