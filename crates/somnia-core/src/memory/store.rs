//! Tier-indexed memory storage
//!
//! Each tier holds an `Arc<Vec<Arc<Memory>>>` behind its own `RwLock`.
//! Readers clone the outer `Arc` and work on an immutable snapshot; writers
//! copy-on-write. A replace swaps the whole list under the write lock, so a
//! concurrent reader sees either the old list or the new one, never a mix.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use super::{Memory, Tier};

/// Immutable view over one tier
pub type TierSnapshot = Arc<Vec<Arc<Memory>>>;

/// One bounded collection per memory tier
#[derive(Debug, Default)]
pub struct MemoryStore {
    tiers: [RwLock<TierSnapshot>; 4],
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the memory's tier; returns the post-add tier size
    pub fn add(&self, memory: Arc<Memory>) -> usize {
        let mut guard = self.tiers[memory.tier.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let list = Arc::make_mut(&mut guard);
        list.push(memory);
        list.len()
    }

    /// Immutable view of a tier
    pub fn snapshot(&self, tier: Tier) -> TierSnapshot {
        self.tiers[tier.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap a tier's contents in one step; returns the previous list
    pub fn replace(&self, tier: Tier, memories: Vec<Arc<Memory>>) -> TierSnapshot {
        let mut guard = self.tiers[tier.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(memories))
    }

    /// Install the outcome of a consolidation computed from `base`.
    ///
    /// Memories added to the tier after `base` was taken are appended to
    /// `kept` instead of being lost. Returns how many such late arrivals
    /// were carried over.
    pub fn commit_consolidation(
        &self,
        tier: Tier,
        base: &TierSnapshot,
        mut kept: Vec<Arc<Memory>>,
    ) -> usize {
        let mut guard = self.tiers[tier.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut late = 0;
        if !Arc::ptr_eq(&guard, base) {
            let seen: HashSet<Uuid> = base.iter().map(|m| m.id).collect();
            for memory in guard.iter().filter(|m| !seen.contains(&m.id)) {
                kept.push(Arc::clone(memory));
                late += 1;
            }
        }

        *guard = Arc::new(kept);
        late
    }

    pub fn len(&self, tier: Tier) -> usize {
        self.tiers[tier.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn total_len(&self) -> usize {
        Tier::ALL.iter().map(|t| self.len(*t)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Sizes of every tier, in tier order
    pub fn sizes(&self) -> Vec<(Tier, usize)> {
        Tier::ALL.iter().map(|t| (*t, self.len(*t))).collect()
    }

    /// Look a memory up across tiers
    pub fn find(&self, id: &Uuid) -> Option<Arc<Memory>> {
        Tier::ALL
            .iter()
            .find_map(|t| self.snapshot(*t).iter().find(|m| m.id == *id).cloned())
    }

    /// Snapshot of every tier, in tier order
    pub fn snapshot_all(&self) -> Vec<(Tier, TierSnapshot)> {
        Tier::ALL.iter().map(|t| (*t, self.snapshot(*t))).collect()
    }
}
