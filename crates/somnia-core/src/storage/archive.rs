//! Long-term archive
//!
//! Memories demoted by consolidation are staged in a pending batch. The
//! nightly cleanup phase seals the batch, together with the day's
//! experiences and patterns, into one append-only [`ArchiveEntry`].
//! A failed write puts the batch back so the next night retries it.
//!
//! Until it is sealed, the day lives in a [`PendingDay`] checkpoint next to
//! the tier snapshots. Appending an entry prunes what it sealed from that
//! checkpoint, so a restart never loses or double-archives a memory.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::consolidation::{Experience, KnowledgeEntry, Pattern};
use crate::error::{MemoryError, Result};
use crate::memory::{MemoryRecord, Tier};

// ============================================================================
// ENTRY TYPES
// ============================================================================

/// Counters describing one nightly cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DailyMetrics {
    pub experiences: usize,
    pub recurring_patterns: usize,
    pub sequential_patterns: usize,
    pub co_occurrence_patterns: usize,
    pub knowledge_touched: usize,
    pub conflicts_resolved: usize,
    pub batches_applied: usize,
    pub batches_rolled_back: usize,
    pub memories_archived: usize,
    /// Active tier sizes after cleanup
    pub tier_sizes: BTreeMap<Tier, usize>,
}

/// One sealed day of archived state. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub id: Uuid,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    /// In demotion order
    pub archived_memories: Vec<MemoryRecord>,
    pub experiences: Vec<Experience>,
    pub patterns: Vec<Pattern>,
    pub daily_metrics: DailyMetrics,
}

/// Summary row of the archive log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveDay {
    pub date: NaiveDate,
    pub entries: usize,
    pub memories: usize,
}

/// One completed (or cut short) nightly run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NightlyRunRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub completed: bool,
    pub summary: String,
}

/// Everything accumulated since the last seal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDay {
    pub saved_at: DateTime<Utc>,
    pub day: NaiveDate,
    /// Demoted and waiting for the seal, in demotion order
    pub memories: Vec<MemoryRecord>,
    pub experiences: Vec<Experience>,
}

impl PendingDay {
    pub fn new(day: NaiveDate, memories: Vec<MemoryRecord>, experiences: Vec<Experience>) -> Self {
        Self {
            saved_at: Utc::now(),
            day,
            memories,
            experiences,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty() && self.experiences.is_empty()
    }

    /// Drop what `entry` has sealed. Returns whether anything was removed.
    pub fn prune_sealed(&mut self, entry: &ArchiveEntry) -> bool {
        let memories: HashSet<Uuid> = entry.archived_memories.iter().map(|m| m.id).collect();
        let experiences: HashSet<Uuid> = entry.experiences.iter().map(|e| e.id).collect();
        let before = self.memories.len() + self.experiences.len();
        self.memories.retain(|m| !memories.contains(&m.id));
        self.experiences.retain(|e| !experiences.contains(&e.id));
        before != self.memories.len() + self.experiences.len()
    }
}

/// State written together so a restart resumes where the process stopped
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub tiers: Vec<(Tier, Vec<MemoryRecord>)>,
    pub pending_day: PendingDay,
    pub knowledge: Vec<KnowledgeEntry>,
}

// ============================================================================
// BACKEND
// ============================================================================

/// Durable storage behind [`ArchiveStore`]
pub trait ArchiveBackend: Send + Sync {
    /// Append one entry; entries are never updated afterwards.
    ///
    /// Also prunes what the entry seals from the saved [`PendingDay`], in the
    /// same write where the backend supports it.
    fn append(&self, entry: &ArchiveEntry) -> Result<()>;

    /// Entries sealed for a date, in write order
    fn entries_for(&self, date: NaiveDate) -> Result<Vec<ArchiveEntry>>;

    /// Every archived date, oldest first
    fn days(&self) -> Result<Vec<ArchiveDay>>;

    /// Overwrite the persisted snapshot of one tier
    fn save_snapshot(&self, tier: Tier, records: &[MemoryRecord]) -> Result<()>;

    /// Persisted snapshots keyed by their raw tier tag
    fn load_snapshots(&self) -> Result<Vec<(String, Vec<MemoryRecord>)>>;

    fn record_run(&self, run: &NightlyRunRecord) -> Result<()>;

    fn last_run(&self) -> Result<Option<NightlyRunRecord>>;

    /// Overwrite the saved unsealed day
    fn save_pending_day(&self, day: &PendingDay) -> Result<()>;

    fn load_pending_day(&self) -> Result<Option<PendingDay>>;

    /// Overwrite the saved knowledge base
    fn save_knowledge(&self, entries: &[KnowledgeEntry]) -> Result<()>;

    fn load_knowledge(&self) -> Result<Vec<KnowledgeEntry>>;

    /// Write a whole checkpoint. Backends with transactions override this
    /// to make it all-or-nothing.
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        for (tier, records) in &checkpoint.tiers {
            self.save_snapshot(*tier, records)?;
        }
        self.save_pending_day(&checkpoint.pending_day)?;
        self.save_knowledge(&checkpoint.knowledge)
    }
}

/// Process-local backend for tests and ephemeral hosts
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    entries: Mutex<Vec<ArchiveEntry>>,
    snapshots: Mutex<BTreeMap<String, Vec<MemoryRecord>>>,
    runs: Mutex<Vec<NightlyRunRecord>>,
    pending_day: Mutex<Option<PendingDay>>,
    knowledge: Mutex<Vec<KnowledgeEntry>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ArchiveEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Plant a raw snapshot, e.g. one written by another version
    pub fn put_raw_snapshot(&self, tag: impl Into<String>, records: Vec<MemoryRecord>) {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.into(), records);
    }
}

impl ArchiveBackend for InMemoryArchive {
    fn append(&self, entry: &ArchiveEntry) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending_day = self.pending_day.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push(entry.clone());
        if let Some(day) = pending_day.as_mut() {
            day.prune_sealed(entry);
        }
        Ok(())
    }

    fn entries_for(&self, date: NaiveDate) -> Result<Vec<ArchiveEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.date == date)
            .cloned()
            .collect())
    }

    fn days(&self) -> Result<Vec<ArchiveDay>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut days: BTreeMap<NaiveDate, ArchiveDay> = BTreeMap::new();
        for entry in entries.iter() {
            let day = days.entry(entry.date).or_insert(ArchiveDay {
                date: entry.date,
                entries: 0,
                memories: 0,
            });
            day.entries += 1;
            day.memories += entry.archived_memories.len();
        }
        Ok(days.into_values().collect())
    }

    fn save_snapshot(&self, tier: Tier, records: &[MemoryRecord]) -> Result<()> {
        self.put_raw_snapshot(tier.as_str(), records.to_vec());
        Ok(())
    }

    fn load_snapshots(&self) -> Result<Vec<(String, Vec<MemoryRecord>)>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(tag, records)| (tag.clone(), records.clone()))
            .collect())
    }

    fn record_run(&self, run: &NightlyRunRecord) -> Result<()> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(run.clone());
        Ok(())
    }

    fn last_run(&self) -> Result<Option<NightlyRunRecord>> {
        Ok(self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned())
    }

    fn save_pending_day(&self, day: &PendingDay) -> Result<()> {
        *self.pending_day.lock().unwrap_or_else(PoisonError::into_inner) = Some(day.clone());
        Ok(())
    }

    fn load_pending_day(&self) -> Result<Option<PendingDay>> {
        Ok(self
            .pending_day
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save_knowledge(&self, entries: &[KnowledgeEntry]) -> Result<()> {
        *self.knowledge.lock().unwrap_or_else(PoisonError::into_inner) = entries.to_vec();
        Ok(())
    }

    fn load_knowledge(&self) -> Result<Vec<KnowledgeEntry>> {
        Ok(self
            .knowledge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

// ============================================================================
// ARCHIVE STORE
// ============================================================================

/// Pending batch plus the bounded in-memory view over the archive log
pub struct ArchiveStore {
    backend: Arc<dyn ArchiveBackend>,
    pending: Mutex<Vec<MemoryRecord>>,
    recent: Mutex<VecDeque<MemoryRecord>>,
    recent_capacity: usize,
    max_pending: usize,
}

impl std::fmt::Debug for ArchiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStore")
            .field("pending", &self.pending_len())
            .field("recent_capacity", &self.recent_capacity)
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

impl ArchiveStore {
    pub fn new(
        backend: Arc<dyn ArchiveBackend>,
        max_permanent_memories: usize,
        max_pending: usize,
    ) -> Self {
        Self {
            backend,
            pending: Mutex::new(Vec::new()),
            recent: Mutex::new(VecDeque::new()),
            recent_capacity: max_permanent_memories,
            max_pending: max_pending.max(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ArchiveBackend> {
        &self.backend
    }

    /// Add demoted memories to the pending batch.
    ///
    /// A batch grown past its bound is sealed early into an entry of its
    /// own, without experiences or patterns. If that write fails the batch
    /// stays pending; demoted memories are never dropped.
    pub fn stage(&self, records: Vec<MemoryRecord>) {
        if records.is_empty() {
            return;
        }
        let pending = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.extend(records);
            pending.len()
        };
        if pending <= self.max_pending {
            return;
        }

        warn!(pending, max = self.max_pending, "Pending archive batch over its bound, sealing early");
        match self.seal(Local::now().date_naive(), Vec::new(), Vec::new(), DailyMetrics::default()) {
            Ok(entry) => info!(
                entry = %entry.id,
                memories = entry.archived_memories.len(),
                "Sealed overflow archive entry"
            ),
            Err(e) => warn!(error = %e, pending, "Early seal failed, batch stays pending"),
        }
    }

    /// Put back memories recovered from a checkpoint, ahead of anything
    /// staged since startup. Ids already pending are skipped.
    pub fn restore_pending(&self, recovered: Vec<MemoryRecord>) -> usize {
        if recovered.is_empty() {
            return 0;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let known: HashSet<Uuid> = pending.iter().map(|r| r.id).collect();
        let mut merged: Vec<MemoryRecord> = recovered
            .into_iter()
            .filter(|r| !known.contains(&r.id))
            .collect();
        let restored = merged.len();
        merged.append(&mut pending);
        *pending = merged;
        restored
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn pending(&self) -> Vec<MemoryRecord> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Seal the pending batch into one entry and write it.
    ///
    /// Memories staged while the write is in flight join the next batch.
    /// On failure the sealed memories go back to the front of the pending
    /// batch and [`MemoryError::ArchiveWrite`] is returned.
    pub fn seal(
        &self,
        date: NaiveDate,
        experiences: Vec<Experience>,
        patterns: Vec<Pattern>,
        mut daily_metrics: DailyMetrics,
    ) -> Result<ArchiveEntry> {
        let archived_memories =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        daily_metrics.memories_archived = archived_memories.len();

        let entry = ArchiveEntry {
            id: Uuid::new_v4(),
            date,
            created_at: Utc::now(),
            archived_memories,
            experiences,
            patterns,
            daily_metrics,
        };

        if let Err(e) = self.backend.append(&entry) {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let late = std::mem::take(&mut *pending);
            pending.extend(entry.archived_memories);
            pending.extend(late);
            return Err(MemoryError::ArchiveWrite(e.to_string()));
        }

        self.remember(&entry.archived_memories);
        Ok(entry)
    }

    fn remember(&self, records: &[MemoryRecord]) {
        if self.recent_capacity == 0 {
            return;
        }
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            if recent.len() == self.recent_capacity {
                recent.pop_front();
            }
            recent.push_back(record.clone());
        }
    }

    /// Up to `n` most recently archived memories, oldest first
    pub fn recent(&self, n: usize) -> Vec<MemoryRecord> {
        let recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = recent.len().saturating_sub(n);
        recent.iter().skip(skip).cloned().collect()
    }

    pub fn entries_for(&self, date: NaiveDate) -> Result<Vec<ArchiveEntry>> {
        self.backend.entries_for(date)
    }

    pub fn days(&self) -> Result<Vec<ArchiveDay>> {
        self.backend.days()
    }
}
