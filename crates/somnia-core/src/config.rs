//! Engine configuration
//!
//! The configuration surface is enumerated rather than free-form: every
//! knob the engine reads lives in one of the structs below. All structs
//! deserialize with `#[serde(default)]` so partial JSON files work.

use std::collections::HashMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};
use crate::memory::Tier;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default embedding width of the on-device encoder
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

/// Default active size of each tier
pub const DEFAULT_ACTIVE_MEMORY_SIZE: usize = 8192;

/// Default bound of the in-memory archive view
pub const DEFAULT_MAX_PERMANENT_MEMORIES: usize = 100_000;

/// Default capacity of the raw interaction log
pub const DEFAULT_MAX_CONTEXT_ITEMS: usize = 100;

/// Default bound of the experiences waiting for nightly integration
pub const DEFAULT_MAX_DAY_EXPERIENCES: usize = 10_000;

/// Default bound of the demoted memories waiting for the nightly seal
pub const DEFAULT_MAX_PENDING_ARCHIVE: usize = 4096;

// ============================================================================
// MEMORY CONFIG
// ============================================================================

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryConfig {
    /// Embedding width, fixed for the lifetime of the store
    pub embedding_dimension: usize,
    /// Active size applied to every tier without an override
    pub active_memory_size: usize,
    /// Per-tier overrides of `active_memory_size`
    pub tier_capacity: HashMap<Tier, usize>,
    /// Bound of the in-memory view over archived memories
    pub max_permanent_memories: usize,
    /// Capacity of the context buffer
    pub max_context_items: usize,
    /// Cosine similarity above which an existing memory lends its concepts
    /// to a new one
    pub association_threshold: f32,
    pub retrieval: RetrievalConfig,
    pub score: ScoreWeights,
    pub nightly: NightlyConfig,
    pub background: BackgroundConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            active_memory_size: DEFAULT_ACTIVE_MEMORY_SIZE,
            tier_capacity: HashMap::new(),
            max_permanent_memories: DEFAULT_MAX_PERMANENT_MEMORIES,
            max_context_items: DEFAULT_MAX_CONTEXT_ITEMS,
            association_threshold: 0.8,
            retrieval: RetrievalConfig::default(),
            score: ScoreWeights::default(),
            nightly: NightlyConfig::default(),
            background: BackgroundConfig::default(),
        }
    }
}

impl MemoryConfig {
    /// Active-size bound for a tier
    pub fn capacity_for(&self, tier: Tier) -> usize {
        self.tier_capacity
            .get(&tier)
            .copied()
            .unwrap_or(self.active_memory_size)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimension == 0 {
            return Err(MemoryError::Init("embeddingDimension must be > 0".into()));
        }
        if self.max_context_items == 0 {
            return Err(MemoryError::Init("maxContextItems must be > 0".into()));
        }
        for tier in Tier::ALL {
            if self.capacity_for(tier) == 0 {
                return Err(MemoryError::Init(format!(
                    "active memory size for tier {} must be > 0",
                    tier
                )));
            }
        }
        if self.nightly.training_batch_size == 0 || self.background.batch_items == 0 {
            return Err(MemoryError::Init("training batch sizes must be > 0".into()));
        }
        if self.nightly.max_day_experiences == 0 || self.nightly.max_pending_archive == 0 {
            return Err(MemoryError::Init("buffered day bounds must be > 0".into()));
        }
        if self.nightly.window_start_hour > 23 || self.nightly.window_end_hour > 24 {
            return Err(MemoryError::Init("night window hours out of range".into()));
        }
        Ok(())
    }
}

// ============================================================================
// RETRIEVAL
// ============================================================================

/// Cutoffs for relevance retrieval and prompt assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrievalConfig {
    pub working_top_k: usize,
    pub episodic_top_k: usize,
    /// Semantic and procedural tiers
    pub other_top_k: usize,
    /// Per-tier caps used when building the generation prompt
    pub prompt_working: usize,
    pub prompt_episodic: usize,
    pub prompt_semantic: usize,
    /// Word-overlap threshold for the context buffer
    pub context_threshold: f64,
    /// Context items placed in a query prompt
    pub context_prompt_items: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            working_top_k: 50,
            episodic_top_k: 30,
            other_top_k: 20,
            prompt_working: 5,
            prompt_episodic: 3,
            prompt_semantic: 3,
            context_threshold: 0.5,
            context_prompt_items: 5,
        }
    }
}

impl RetrievalConfig {
    /// Retrieval cutoff for a tier
    pub fn top_k_for(&self, tier: Tier) -> usize {
        match tier {
            Tier::Working => self.working_top_k,
            Tier::Episodic => self.episodic_top_k,
            Tier::Semantic | Tier::Procedural => self.other_top_k,
        }
    }

    /// Prompt cap for a tier; procedural memories are not placed in prompts
    pub fn prompt_cap_for(&self, tier: Tier) -> usize {
        match tier {
            Tier::Working => self.prompt_working,
            Tier::Episodic => self.prompt_episodic,
            Tier::Semantic => self.prompt_semantic,
            Tier::Procedural => 0,
        }
    }
}

// ============================================================================
// CONSOLIDATION SCORE
// ============================================================================

/// Weights of the consolidation score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScoreWeights {
    pub importance: f64,
    pub recency: f64,
    pub retrieval: f64,
    pub associations: f64,
    /// Age at which the recency term halves
    pub recency_half_life_days: f64,
    /// Association count at which the association term saturates
    pub association_saturation: usize,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            importance: 0.4,
            recency: 0.3,
            retrieval: 0.2,
            associations: 0.1,
            recency_half_life_days: 7.0,
            association_saturation: 10,
        }
    }
}

// ============================================================================
// NIGHTLY INTEGRATION
// ============================================================================

/// Gate and pipeline settings for nightly integration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NightlyConfig {
    /// Local hour the night window opens (inclusive)
    pub window_start_hour: u32,
    /// Local hour the night window closes (exclusive)
    pub window_end_hour: u32,
    pub idle_threshold_hours: i64,
    pub free_memory_ratio: f64,
    /// Knowledge entries per `trainStep` batch
    pub training_batch_size: usize,
    /// Occurrences before a concept counts as recurring
    pub recurring_min_occurrences: usize,
    /// Consecutive experiences per temporal window
    pub sequence_window: usize,
    /// Share of the day's experiences a pair must co-occur in
    pub strong_association_ratio: f64,
    /// Experiences held for the next run; the oldest are dropped beyond this
    pub max_day_experiences: usize,
    /// Demoted memories held for the next seal; beyond this the batch is
    /// sealed early into its own entry
    pub max_pending_archive: usize,
}

impl Default for NightlyConfig {
    fn default() -> Self {
        Self {
            window_start_hour: 2,
            window_end_hour: 5,
            idle_threshold_hours: 2,
            free_memory_ratio: 0.8,
            training_batch_size: 8,
            recurring_min_occurrences: 3,
            sequence_window: 3,
            strong_association_ratio: 0.1,
            max_day_experiences: DEFAULT_MAX_DAY_EXPERIENCES,
            max_pending_archive: DEFAULT_MAX_PENDING_ARCHIVE,
        }
    }
}

impl NightlyConfig {
    pub fn idle_threshold(&self) -> Duration {
        Duration::hours(self.idle_threshold_hours)
    }

    /// Whether a local hour falls inside the window; windows may wrap midnight
    pub fn in_window(&self, hour: u32) -> bool {
        let (start, end) = (self.window_start_hour, self.window_end_hour);
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

// ============================================================================
// LIGHT BACKGROUND LEARNING
// ============================================================================

/// Gate and loop settings for light background-learning cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackgroundConfig {
    /// Minimum battery level when not charging
    pub battery_threshold: f64,
    pub idle_threshold_minutes: i64,
    pub free_memory_ratio: f64,
    /// Most recent context items per training batch
    pub batch_items: usize,
    /// Pause between batches
    pub batch_pause_secs: u64,
    pub max_batches_per_cycle: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            battery_threshold: 0.3,
            idle_threshold_minutes: 30,
            free_memory_ratio: 0.8,
            batch_items: 10,
            batch_pause_secs: 5,
            max_batches_per_cycle: 12,
        }
    }
}

impl BackgroundConfig {
    pub fn idle_threshold(&self) -> Duration {
        Duration::minutes(self.idle_threshold_minutes)
    }

    pub fn batch_pause(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.batch_pause_secs)
    }
}
