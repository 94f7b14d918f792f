//! # Somnia Core
//!
//! Tiered associative memory for on-device assistants, with sleep-style
//! consolidation:
//!
//! - **Four tiers**: Working, Episodic, Semantic and Procedural memories,
//!   each bounded by an active size
//! - **Relevance retrieval**: per-tier top-K by `similarity * importance`
//! - **Consolidation**: over-capacity tiers keep their best-scoring memories
//!   and demote the rest to an append-only, day-organized archive
//! - **Nightly integration**: pattern extraction, knowledge merge, guarded
//!   training batches with rollback, then cleanup
//! - **Background scheduling**: cycles start only when the device is
//!   charging, idle and has memory to spare
//!
//! Embedding, generation and training are consumed through the
//! [`Embedder`], [`Generator`] and [`Trainer`] traits; this crate never
//! computes them itself.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use somnia_core::{Collaborators, Input, MemoryConfig, MemorySystem, SqliteArchive};
//!
//! let backend = Arc::new(SqliteArchive::open(None)?);
//! let system = MemorySystem::new(
//!     MemoryConfig::default(),
//!     Collaborators { embedder, generator, trainer },
//!     backend,
//! )?;
//!
//! let outcome = system.process_input(Input::text("How to reset the router")).await?;
//! println!("{} -> {}", outcome.tier, outcome.output);
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): SQLite archive log, unencrypted
//! - `encryption`: SQLCipher archive log keyed by `SOMNIA_ENCRYPTION_KEY`

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod classify;
pub mod collaborators;
pub mod config;
pub mod consolidation;
pub mod error;
pub mod memory;
pub mod scheduler;
pub mod search;
pub mod storage;
pub mod system;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use error::{MemoryError, Result};

pub use config::{
    BackgroundConfig, MemoryConfig, NightlyConfig, RetrievalConfig, ScoreWeights,
};

// Memory model
pub use memory::{
    ContextBuffer, ContextItem, Memory, MemoryRecord, MemoryStore, ScoredContext, Tier,
    TierSnapshot,
};

// Collaborator contract
pub use collaborators::{
    BatchSource, CollaboratorError, Embedder, Generator, TrainOutcome, Trainer, TrainingBatch,
    TrainingExample,
};

pub use classify::{ConceptExtractor, HeuristicClassifier, Input, KeywordExtractor, TierClassifier};

pub use search::{RelevanceIndex, ScoredMemory, cosine_similarity};

// Consolidation
pub use consolidation::{
    BatchOutcome, BatchReport, ConsolidationEngine, DailyAccumulator, Experience,
    KnowledgeBase, KnowledgeEntry, NightlyPhase, NightlyReport, Pattern, PatternType,
    PhaseResult, PhaseStatus, TierConsolidation,
};

// Storage layer
pub use storage::{
    ArchiveBackend, ArchiveDay, ArchiveEntry, ArchiveStore, Checkpoint, DailyMetrics,
    InMemoryArchive, NightlyRunRecord, PendingDay, SqliteArchive,
};

// Scheduling
pub use scheduler::{
    ActivityTracker, BackgroundScheduler, CycleKind, CycleReport, CycleState, DeviceMonitor,
    DeviceState, GateDecision, GateViolation, LightCycleReport, StartOutcome, evaluate_gate,
};

pub use system::{Collaborators, MemorySystem, ProcessOutcome, SystemStats};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        BackgroundScheduler, Collaborators, CycleKind, DeviceMonitor, DeviceState, Embedder,
        Generator, Input, MemoryConfig, MemoryError, MemorySystem, Result, SqliteArchive, Tier,
        Trainer,
    };
}
