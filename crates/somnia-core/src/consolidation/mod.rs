//! Consolidation Module
//!
//! - Tier consolidation: score, keep the best, stage the rest for archival
//! - Nightly integration: patterns, knowledge merge, guarded training, cleanup
//!
//! Score weights and the night window come from [`crate::config`].

mod accumulator;
mod engine;
mod knowledge;
mod nightly;
mod patterns;
mod scoring;

pub use accumulator::{DailyAccumulator, Experience};
pub use engine::{ConsolidationEngine, TierConsolidation};
pub use knowledge::{Conflict, IntegrationSummary, KnowledgeBase, KnowledgeEntry};
pub(crate) use nightly::apply_batch;
pub use nightly::{
    BatchOutcome, BatchReport, NightlyContext, NightlyPhase, NightlyReport, PhaseResult,
    PhaseStatus,
};
pub use patterns::{Pattern, PatternExtractor, PatternType};
pub use scoring::{ScoreInputs, consolidation_score, recency};
