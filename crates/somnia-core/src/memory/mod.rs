//! Memory module - Core types and data structures
//!
//! Implements the tiered memory model:
//! - Four memory tiers as an explicit tag, with tier-indexed storage
//! - Scored memory records with immutable content
//! - Snapshot/replace tier storage for safe concurrent consolidation
//! - A bounded FIFO log of raw interactions

mod context;
mod record;
mod store;

pub use context::{ContextBuffer, ContextItem, ScoredContext, word_overlap};
pub use record::{Memory, MemoryRecord};
pub use store::{MemoryStore, TierSnapshot};

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

// ============================================================================
// MEMORY TIERS
// ============================================================================

/// Memory tier classification
///
/// A memory is created directly into one tier and only ever leaves it by
/// archival.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Fast, active scratch memory (default)
    Working,
    /// Recent interactions and experiences
    Episodic,
    /// Facts and reference knowledge
    Semantic,
    /// Skills, procedures, instructions
    Procedural,
}

impl Tier {
    /// Every tier, in retrieval concatenation order
    pub const ALL: [Tier; 4] = [Tier::Working, Tier::Episodic, Tier::Semantic, Tier::Procedural];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Working => "working",
            Tier::Episodic => "episodic",
            Tier::Semantic => "semantic",
            Tier::Procedural => "procedural",
        }
    }

    /// Position in [`Tier::ALL`]
    pub(crate) fn index(&self) -> usize {
        match self {
            Tier::Working => 0,
            Tier::Episodic => 1,
            Tier::Semantic => 2,
            Tier::Procedural => 3,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "working" => Ok(Tier::Working),
            "episodic" => Ok(Tier::Episodic),
            "semantic" => Ok(Tier::Semantic),
            "procedural" => Ok(Tier::Procedural),
            _ => Err(MemoryError::InvalidTier(s.to_string())),
        }
    }
}
