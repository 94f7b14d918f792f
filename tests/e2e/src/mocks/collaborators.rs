//! Scriptable collaborators
//!
//! Every mock records what it was asked to do and can be switched offline
//! at runtime, so tests can assert on exactly which calls the engine made.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use somnia_core::{
    ArchiveBackend, ArchiveDay, ArchiveEntry, BatchSource, CollaboratorError, ConceptExtractor,
    Embedder, Generator, InMemoryArchive, KnowledgeEntry, MemoryError, MemoryRecord,
    NightlyRunRecord, PendingDay, Tier, TrainOutcome, Trainer, TrainingBatch,
};

// ============================================================================
// EMBEDDER
// ============================================================================

/// Hashing-trick bag of words; identical word sets embed identically
pub struct MockEmbedder {
    dimension: usize,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            offline: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for word in text.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            vector[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unreachable("mock embedder offline".into()));
        }
        Ok(self.vector(text))
    }
}

// ============================================================================
// GENERATOR
// ============================================================================

/// Answers "Noted: <input>" and keeps every prompt
#[derive(Default)]
pub struct MockGenerator {
    offline: AtomicBool,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unreachable("mock generator offline".into()));
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        let input = prompt
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix("Current Input: ").or_else(|| l.strip_prefix("Question: ")))
            .unwrap_or_default();
        Ok(format!("Noted: {}", input))
    }
}

// ============================================================================
// TRAINER
// ============================================================================

/// One `train_step` call as the trainer saw it
#[derive(Debug, Clone, PartialEq)]
pub struct TrainCall {
    pub id: String,
    pub source: BatchSource,
    pub index: usize,
    pub examples: usize,
}

/// Accepts batches unless told to fail them
#[derive(Default)]
pub struct MockTrainer {
    failing: Mutex<Vec<(BatchSource, usize)>>,
    unreachable: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<TrainCall>>,
    rollbacks: Mutex<Vec<String>>,
}

impl MockTrainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a malformed result for batch `index` of `source`
    pub fn fail_batch(&self, source: BatchSource, index: usize) {
        self.failing.lock().unwrap().push((source, index));
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Sleep this long inside every step
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<TrainCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn rollbacks(&self) -> Vec<String> {
        self.rollbacks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Trainer for MockTrainer {
    async fn train_step(&self, batch: &TrainingBatch) -> Result<TrainOutcome, CollaboratorError> {
        self.calls.lock().unwrap().push(TrainCall {
            id: batch.id.clone(),
            source: batch.source,
            index: batch.index,
            examples: batch.len(),
        });

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unreachable("accelerator busy".into()));
        }
        if self.failing.lock().unwrap().contains(&(batch.source, batch.index)) {
            return Ok(TrainOutcome {
                success: true,
                loss: Some(f64::NAN),
                diagnostics: "loss diverged".into(),
            });
        }
        Ok(TrainOutcome::ok(0.42))
    }

    async fn rollback(&self, batch_id: &str) -> Result<(), CollaboratorError> {
        self.rollbacks.lock().unwrap().push(batch_id.to_string());
        Ok(())
    }
}

// ============================================================================
// CONCEPTS
// ============================================================================

/// Only `#tagged` words are concepts, so tests control the concept set
pub struct TagExtractor;

impl ConceptExtractor for TagExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        text.split_whitespace()
            .filter_map(|w| w.strip_prefix('#'))
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty() && seen.insert(w.clone()))
            .collect()
    }
}

// ============================================================================
// ARCHIVE
// ============================================================================

/// In-memory archive whose next `n` appends fail
pub struct FlakyArchive {
    inner: InMemoryArchive,
    failures_left: AtomicUsize,
}

impl FlakyArchive {
    pub fn failing(n: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryArchive::new(),
            failures_left: AtomicUsize::new(n),
        })
    }

    pub fn entries(&self) -> Vec<ArchiveEntry> {
        self.inner.entries()
    }
}

impl ArchiveBackend for FlakyArchive {
    fn append(&self, entry: &ArchiveEntry) -> Result<(), MemoryError> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MemoryError::Io(std::io::Error::other("disk full")));
        }
        self.inner.append(entry)
    }

    fn entries_for(&self, date: NaiveDate) -> Result<Vec<ArchiveEntry>, MemoryError> {
        self.inner.entries_for(date)
    }

    fn days(&self) -> Result<Vec<ArchiveDay>, MemoryError> {
        self.inner.days()
    }

    fn save_snapshot(&self, tier: Tier, records: &[MemoryRecord]) -> Result<(), MemoryError> {
        self.inner.save_snapshot(tier, records)
    }

    fn load_snapshots(&self) -> Result<Vec<(String, Vec<MemoryRecord>)>, MemoryError> {
        self.inner.load_snapshots()
    }

    fn record_run(&self, run: &NightlyRunRecord) -> Result<(), MemoryError> {
        self.inner.record_run(run)
    }

    fn last_run(&self) -> Result<Option<NightlyRunRecord>, MemoryError> {
        self.inner.last_run()
    }

    fn save_pending_day(&self, day: &PendingDay) -> Result<(), MemoryError> {
        self.inner.save_pending_day(day)
    }

    fn load_pending_day(&self) -> Result<Option<PendingDay>, MemoryError> {
        self.inner.load_pending_day()
    }

    fn save_knowledge(&self, entries: &[KnowledgeEntry]) -> Result<(), MemoryError> {
        self.inner.save_knowledge(entries)
    }

    fn load_knowledge(&self) -> Result<Vec<KnowledgeEntry>, MemoryError> {
        self.inner.load_knowledge()
    }
}
