//! Memory system facade
//!
//! Owns every piece of shared state and exposes the foreground path
//! (`process_input`, `query`, `add_context`) plus the entry points the
//! background scheduler drives. Foreground calls never wait on a background
//! cycle: the two only meet at the tier swap inside [`MemoryStore`] and at
//! short per-structure locks.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{ConceptExtractor, HeuristicClassifier, Input, KeywordExtractor, TierClassifier};
use crate::collaborators::{Embedder, Generator, Trainer};
use crate::config::{MemoryConfig, RetrievalConfig};
use crate::consolidation::{
    ConsolidationEngine, DailyAccumulator, Experience, KnowledgeBase, KnowledgeEntry,
    NightlyContext, NightlyReport, TierConsolidation,
};
use crate::error::{MemoryError, Result};
use crate::memory::{ContextBuffer, ContextItem, Memory, MemoryRecord, MemoryStore, ScoredContext, Tier};
use crate::scheduler::{ActivityStats, ActivityTracker};
use crate::search::RelevanceIndex;
use crate::storage::{ArchiveBackend, ArchiveStore, Checkpoint, NightlyRunRecord, PendingDay};

/// The three external capabilities the engine consumes
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub trainer: Arc<dyn Trainer>,
}

/// Result of one `process_input` call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub output: String,
    pub memory_id: Uuid,
    pub tier: Tier,
    pub importance: f64,
    /// Memories retrieved for the prompt
    pub retrieved: usize,
    /// Concepts linked at creation
    pub associations: Vec<String>,
    /// Present when the add pushed the tier over capacity
    pub consolidation: Option<TierConsolidation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub tiers: BTreeMap<Tier, usize>,
    pub context_items: usize,
    pub pending_archive: usize,
    pub experiences_today: usize,
    pub knowledge_entries: usize,
    pub knowledge_pending_training: usize,
    pub activity: ActivityStats,
}

pub struct MemorySystem {
    config: MemoryConfig,
    store: MemoryStore,
    context: Mutex<ContextBuffer>,
    archive: ArchiveStore,
    index: RelevanceIndex,
    engine: ConsolidationEngine,
    accumulator: Mutex<DailyAccumulator>,
    knowledge: Mutex<KnowledgeBase>,
    activity: Mutex<ActivityTracker>,
    generator: Arc<dyn Generator>,
    trainer: Arc<dyn Trainer>,
    classifier: Arc<dyn TierClassifier>,
    extractor: Arc<dyn ConceptExtractor>,
}

impl std::fmt::Debug for MemorySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySystem")
            .field("tiers", &self.store.sizes())
            .field("archive", &self.archive)
            .finish()
    }
}

impl MemorySystem {
    /// Build a system with the default classifier and concept extractor
    pub fn new(
        config: MemoryConfig,
        collaborators: Collaborators,
        backend: Arc<dyn ArchiveBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let extractor: Arc<dyn ConceptExtractor> = Arc::new(KeywordExtractor);
        let index = RelevanceIndex::new(
            collaborators.embedder,
            config.embedding_dimension,
            config.retrieval.clone(),
        );

        Ok(Self {
            store: MemoryStore::new(),
            context: Mutex::new(ContextBuffer::new(config.max_context_items)),
            archive: ArchiveStore::new(
                backend,
                config.max_permanent_memories,
                config.nightly.max_pending_archive,
            ),
            index,
            engine: ConsolidationEngine::new(config.clone(), Arc::clone(&extractor)),
            accumulator: Mutex::new(DailyAccumulator::new(config.nightly.max_day_experiences)),
            knowledge: Mutex::new(KnowledgeBase::new()),
            activity: Mutex::new(ActivityTracker::new()),
            generator: collaborators.generator,
            trainer: collaborators.trainer,
            classifier: Arc::new(HeuristicClassifier),
            extractor,
            config,
        })
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TierClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ConceptExtractor>) -> Self {
        self.engine = ConsolidationEngine::new(self.config.clone(), Arc::clone(&extractor));
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    pub fn index(&self) -> &RelevanceIndex {
        &self.index
    }

    pub(crate) fn trainer(&self) -> &dyn Trainer {
        self.trainer.as_ref()
    }

    // ========================================================================
    // FOREGROUND
    // ========================================================================

    /// Embed, retrieve, generate, then store the interaction as a new memory.
    ///
    /// Fails with `EmbeddingUnavailable` / `GenerationUnavailable` when a
    /// collaborator cannot be reached; nothing is stored in that case.
    pub async fn process_input(&self, input: Input) -> Result<ProcessOutcome> {
        self.record_activity();

        let embedding = self.index.embed(&input.text).await?;
        let relevant = self.index.retrieve_relevant(&self.store, &embedding)?;
        let prompt = assemble_prompt(&input.text, &relevant, &self.config.retrieval);

        let output = self
            .generator
            .generate(&prompt)
            .await
            .map_err(|e| MemoryError::GenerationUnavailable(e.to_string()))?;

        let tier = self.classifier.classify(&input);
        let importance = self.classifier.importance(&input, &output);
        let associations = self.discover_associations(&embedding)?;

        let memory = Memory::new(format!("{}\n{}", input.text, output), tier, embedding, importance)
            .with_associations(associations.iter().cloned());
        let memory_id = memory.id;
        let size = self.store.add(Arc::new(memory));

        let mut metadata = input.metadata.clone();
        metadata.insert("tier".into(), Value::String(tier.as_str().into()));
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(ContextItem::new(input.text.clone(), output.clone()).with_metadata(metadata));

        let concepts = self.extractor.extract(&format!("{} {}", input.text, output));
        self.accumulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(Experience::new(input.text.clone(), output.clone(), concepts, tier));

        let consolidation = (size > self.config.capacity_for(tier))
            .then(|| self.engine.consolidate_tier(&self.store, &self.archive, tier));

        debug!(
            memory = %memory_id,
            tier = %tier,
            retrieved = relevant.len(),
            associations = associations.len(),
            "Input processed"
        );

        Ok(ProcessOutcome {
            output,
            memory_id,
            tier,
            importance,
            retrieved: relevant.len(),
            associations: associations.into_iter().collect::<Vec<_>>(),
            consolidation,
        })
    }

    /// Answer a question from the context buffer alone
    pub async fn query(&self, question: &str) -> Result<String> {
        self.record_activity();

        let relevant = self.relevant_context(question);
        let keep = self.config.retrieval.context_prompt_items;
        let prompt = assemble_query_prompt(question, &relevant[..keep.min(relevant.len())])?;

        self.generator
            .generate(&prompt)
            .await
            .map_err(|e| MemoryError::GenerationUnavailable(e.to_string()))
    }

    /// Log a raw interaction without creating a memory
    pub fn add_context(&self, item: ContextItem) {
        self.record_activity();
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(item);
    }

    pub fn relevant_context(&self, query: &str) -> Vec<ScoredContext> {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .relevant(query, self.config.retrieval.context_threshold)
    }

    pub fn recent_context(&self, n: usize) -> Vec<ContextItem> {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent(n)
    }

    /// Buffered items newer than `after`, oldest first
    pub fn context_since(&self, after: Option<DateTime<Utc>>) -> Vec<ContextItem> {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|item| after.is_none_or(|t| item.timestamp > t))
            .cloned()
            .collect()
    }

    /// Concepts of every stored memory similar to a new embedding
    fn discover_associations(&self, embedding: &[f32]) -> Result<BTreeSet<String>> {
        let similar =
            self.index
                .similar_memories(&self.store, embedding, self.config.association_threshold)?;
        Ok(similar
            .iter()
            .flat_map(|m| self.extractor.extract(&m.content))
            .collect())
    }

    // ========================================================================
    // ACTIVITY
    // ========================================================================

    pub fn record_activity(&self) {
        self.activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_activity();
    }

    /// Time since the last foreground call
    pub fn idle_for(&self) -> Duration {
        self.activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .idle_for(Utc::now())
    }

    // ========================================================================
    // CONSOLIDATION
    // ========================================================================

    pub fn consolidate_tier(&self, tier: Tier) -> TierConsolidation {
        self.engine.consolidate_tier(&self.store, &self.archive, tier)
    }

    /// Run nightly integration and record the run in the archive backend
    pub async fn run_nightly_integration(
        &self,
        keep_running: &(dyn Fn() -> bool + Send + Sync),
    ) -> NightlyReport {
        let report = self
            .engine
            .run_nightly_integration(NightlyContext {
                store: &self.store,
                archive: &self.archive,
                accumulator: &self.accumulator,
                knowledge: &self.knowledge,
                trainer: self.trainer.as_ref(),
                keep_running,
            })
            .await;

        let run = NightlyRunRecord {
            id: Uuid::new_v4(),
            started_at: report.started_at,
            completed_at: report.completed_at,
            completed: report.completed,
            summary: report.summary(),
        };
        if let Err(e) = self.archive.backend().record_run(&run) {
            warn!(error = %e, "Failed to record nightly run");
        }
        if let Err(e) = self.persist_snapshots() {
            warn!(error = %e, "Failed to checkpoint after nightly run");
        }

        info!(completed = report.completed, summary = %run.summary, "Nightly run finished");
        report
    }

    pub fn last_nightly_run(&self) -> Option<NightlyRunRecord> {
        match self.archive.backend().last_run() {
            Ok(run) => run,
            Err(e) => {
                warn!(error = %e, "Failed to read nightly run history");
                None
            }
        }
    }

    pub fn knowledge_entry(&self, concept: &str) -> Option<KnowledgeEntry> {
        self.knowledge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(concept)
            .cloned()
    }

    // ========================================================================
    // RESTART RECOVERY
    // ========================================================================

    /// Checkpoint every active tier, the unsealed day and the knowledge
    /// base; returns the tier memories written.
    ///
    /// Tiers are read before the pending batch, so a memory demoted in
    /// between shows up twice rather than not at all. Restore keeps the
    /// active copy.
    pub fn persist_snapshots(&self) -> Result<usize> {
        let tiers: Vec<(Tier, Vec<MemoryRecord>)> = self
            .store
            .snapshot_all()
            .into_iter()
            .map(|(tier, snapshot)| (tier, snapshot.iter().map(|m| m.to_record()).collect()))
            .collect();
        let written = tiers.iter().map(|(_, records)| records.len()).sum();

        let pending_day = {
            let acc = self.accumulator.lock().unwrap_or_else(PoisonError::into_inner);
            PendingDay::new(acc.day(), self.archive.pending(), acc.experiences().to_vec())
        };
        let knowledge: Vec<KnowledgeEntry> = self
            .knowledge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .cloned()
            .collect();

        let (pending, experiences, concepts) = (
            pending_day.memories.len(),
            pending_day.experiences.len(),
            knowledge.len(),
        );
        self.archive.backend().save_checkpoint(&Checkpoint {
            tiers,
            pending_day,
            knowledge,
        })?;
        info!(memories = written, pending, experiences, concepts, "Checkpoint persisted");
        Ok(written)
    }

    /// Replace active tiers with persisted snapshots; returns memories loaded.
    ///
    /// Every snapshot is checked before any tier is touched.
    pub fn restore_snapshots(&self) -> Result<usize> {
        let mut restored = Vec::new();
        for (tag, records) in self.archive.backend().load_snapshots()? {
            let tier: Tier = tag.parse()?;
            for record in &records {
                if record.embedding.len() != self.config.embedding_dimension {
                    return Err(MemoryError::DimensionMismatch {
                        expected: self.config.embedding_dimension,
                        actual: record.embedding.len(),
                    });
                }
                if record.tier != tier {
                    return Err(MemoryError::InvalidTier(format!(
                        "{} memory {} stored under {}",
                        record.tier, record.id, tag
                    )));
                }
            }
            restored.push((tier, records));
        }

        let backend = self.archive.backend();
        let pending_day = backend.load_pending_day()?;
        if let Some(day) = &pending_day {
            if let Some(record) = day
                .memories
                .iter()
                .find(|r| r.embedding.len() != self.config.embedding_dimension)
            {
                return Err(MemoryError::DimensionMismatch {
                    expected: self.config.embedding_dimension,
                    actual: record.embedding.len(),
                });
            }
        }
        let knowledge = backend.load_knowledge()?;

        let mut loaded = 0;
        let mut active = HashSet::new();
        for (tier, records) in restored {
            loaded += records.len();
            active.extend(records.iter().map(|r| r.id));
            let memories = records.into_iter().map(|r| Arc::new(Memory::from(r))).collect();
            self.store.replace(tier, memories);
        }

        let (mut pending, mut experiences) = (0, 0);
        if let Some(day) = pending_day {
            let memories = day
                .memories
                .into_iter()
                .filter(|r| !active.contains(&r.id))
                .collect();
            pending = self.archive.restore_pending(memories);
            experiences = day.experiences.len();
            self.accumulator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .restore(day.day, day.experiences);
        }
        let concepts = self
            .knowledge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .restore(knowledge);

        info!(memories = loaded, pending, experiences, concepts, "Checkpoint restored");
        Ok(loaded)
    }

    pub fn stats(&self) -> SystemStats {
        let (knowledge_entries, knowledge_pending_training) = {
            let kb = self.knowledge.lock().unwrap_or_else(PoisonError::into_inner);
            (kb.len(), kb.pending_training().len())
        };
        SystemStats {
            tiers: self.store.sizes().into_iter().collect(),
            context_items: self.context.lock().unwrap_or_else(PoisonError::into_inner).len(),
            pending_archive: self.archive.pending_len(),
            experiences_today: self
                .accumulator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            knowledge_entries,
            knowledge_pending_training,
            activity: self
                .activity
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stats(Utc::now()),
        }
    }
}

// ============================================================================
// PROMPTS
// ============================================================================

/// Generation prompt from retrieved memories, capped per tier
pub fn assemble_prompt(input: &str, relevant: &[Arc<Memory>], retrieval: &RetrievalConfig) -> String {
    let sections = [
        (Tier::Working, "Current Context:"),
        (Tier::Episodic, "Relevant Experiences:"),
        (Tier::Semantic, "Relevant Knowledge:"),
    ];

    let mut blocks = Vec::with_capacity(sections.len() + 1);
    for (tier, header) in sections {
        let mut block = String::from(header);
        for memory in relevant
            .iter()
            .filter(|m| m.tier == tier)
            .take(retrieval.prompt_cap_for(tier))
        {
            block.push_str("\n- ");
            block.push_str(&memory.content);
        }
        blocks.push(block);
    }
    blocks.push(format!("Current Input: {}", input));
    blocks.join("\n\n")
}

/// Question prompt over ranked context items
pub fn assemble_query_prompt(question: &str, context: &[ScoredContext]) -> Result<String> {
    let mut prompt = format!("Question: {}\n\nRelevant Context:\n", question);
    for (i, scored) in context.iter().enumerate() {
        let item = serde_json::json!({
            "input": scored.item.input,
            "output": scored.item.output,
            "metadata": scored.item.metadata,
        });
        prompt.push_str(&format!("Context {}: {}\n", i + 1, serde_json::to_string(&item)?));
    }
    prompt.push_str("\nAnswer based on the above context:");
    Ok(prompt)
}
