//! Nightly integration
//!
//! Four phases, each best-effort:
//!
//! 1. **Extracting** - recurring, sequential and co-occurrence patterns
//! 2. **Integrating** - merge patterns into the knowledge base, link
//!    active memories through strong co-occurrences
//! 3. **UpdatingStructure** - one guarded `train_step` per batch of changed
//!    knowledge; a batch that fails validation is rolled back alone
//! 4. **CleaningUp** - bound the tiers, seal the day into the archive and
//!    clear what was archived
//!
//! The gate predicate is re-checked between phases and between batches.
//! Once it closes, the remaining work is skipped and the run goes straight
//! to cleanup, which always runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::accumulator::{DailyAccumulator, Experience};
use super::engine::ConsolidationEngine;
use super::knowledge::KnowledgeBase;
use super::patterns::{Pattern, PatternType};
use crate::collaborators::{BatchSource, CollaboratorError, Trainer, TrainingBatch, TrainingExample};
use crate::memory::{MemoryStore, Tier};
use crate::storage::{ArchiveStore, DailyMetrics};

/// Consecutive rolled-back batches before the rest of phase 3 is skipped
const MAX_CONSECUTIVE_ROLLBACKS: usize = 3;

// ============================================================================
// PHASES AND REPORTS
// ============================================================================

/// State of the nightly pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NightlyPhase {
    Idle,
    Extracting,
    Integrating,
    UpdatingStructure,
    CleaningUp,
}

impl NightlyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NightlyPhase::Idle => "idle",
            NightlyPhase::Extracting => "extracting",
            NightlyPhase::Integrating => "integrating",
            NightlyPhase::UpdatingStructure => "updating_structure",
            NightlyPhase::CleaningUp => "cleaning_up",
        }
    }
}

impl std::fmt::Display for NightlyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PhaseStatus {
    Completed,
    /// Ran part of its work
    Partial { reason: String },
    /// Not run at all
    Skipped { reason: String },
    Failed { reason: String },
}

impl PhaseStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseStatus::Completed)
    }
}

/// Result from a single phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseResult {
    pub phase: NightlyPhase,
    pub status: PhaseStatus,
    pub duration_ms: u64,
    pub items_processed: usize,
    pub actions: Vec<String>,
}

impl PhaseResult {
    fn skipped(phase: NightlyPhase, reason: &str) -> Self {
        Self {
            phase,
            status: PhaseStatus::Skipped {
                reason: reason.to_string(),
            },
            duration_ms: 0,
            items_processed: 0,
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum BatchOutcome {
    Applied { loss: Option<f64> },
    /// Failed validation; its effect was undone
    RolledBack { reason: String },
    /// Never sent to the trainer
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub id: String,
    pub index: usize,
    pub examples: usize,
    pub outcome: BatchOutcome,
}

/// Everything one nightly run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NightlyReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub phases: Vec<PhaseResult>,
    pub batches: Vec<BatchReport>,
    pub patterns: usize,
    pub archive_entry: Option<Uuid>,
    pub metrics: DailyMetrics,
    /// Every phase completed and the day was sealed
    pub completed: bool,
}

impl NightlyReport {
    pub fn phase(&self, phase: NightlyPhase) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn batches_applied(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| matches!(b.outcome, BatchOutcome::Applied { .. }))
            .count()
    }

    pub fn batches_rolled_back(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| matches!(b.outcome, BatchOutcome::RolledBack { .. }))
            .count()
    }

    /// One-line summary for logs and run history
    pub fn summary(&self) -> String {
        let phases: Vec<String> = self
            .phases
            .iter()
            .map(|p| {
                let status = match &p.status {
                    PhaseStatus::Completed => "ok",
                    PhaseStatus::Partial { .. } => "partial",
                    PhaseStatus::Skipped { .. } => "skipped",
                    PhaseStatus::Failed { .. } => "failed",
                };
                format!("{}={}", p.phase, status)
            })
            .collect();
        format!(
            "{} patterns, {}/{} batches applied, {} archived [{}]",
            self.patterns,
            self.batches_applied(),
            self.batches.len(),
            self.metrics.memories_archived,
            phases.join(" ")
        )
    }
}

/// Shared state a nightly run reads and writes
pub struct NightlyContext<'a> {
    pub store: &'a MemoryStore,
    pub archive: &'a ArchiveStore,
    pub accumulator: &'a Mutex<DailyAccumulator>,
    pub knowledge: &'a Mutex<KnowledgeBase>,
    pub trainer: &'a dyn Trainer,
    /// Gate predicate; `false` stops the run at the next boundary
    pub keep_running: &'a (dyn Fn() -> bool + Send + Sync),
}

const GATE_CLOSED: &str = "conditions no longer hold";

/// Knowledge entry queued for training at a given revision
struct PendingExample {
    concept: String,
    revision: u64,
    example: TrainingExample,
}

// ============================================================================
// PIPELINE
// ============================================================================

impl ConsolidationEngine {
    /// Run the four-phase nightly pipeline. Never fails: problems are
    /// reported per phase and logged.
    pub async fn run_nightly_integration(&self, ctx: NightlyContext<'_>) -> NightlyReport {
        let started_at = Utc::now();
        let mut phases = Vec::with_capacity(4);
        let mut metrics = DailyMetrics::default();
        let mut batches = Vec::new();
        let mut short_circuit: Option<&'static str> = None;

        info!(phase = %NightlyPhase::Extracting, "Nightly integration started");

        // Phase 1
        let (day, experiences) = {
            let acc = ctx.accumulator.lock().unwrap_or_else(PoisonError::into_inner);
            (acc.day(), acc.experiences().to_vec())
        };
        let (extract_result, patterns) = self.extract_phase(&experiences);
        metrics.experiences = experiences.len();
        for pattern in &patterns {
            match pattern.pattern_type {
                PatternType::Recurring => metrics.recurring_patterns += 1,
                PatternType::Sequential => metrics.sequential_patterns += 1,
                PatternType::CoOccurrence => metrics.co_occurrence_patterns += 1,
            }
        }
        log_phase(&extract_result);
        phases.push(extract_result);

        // Phase 2
        if !(ctx.keep_running)() {
            short_circuit = Some(GATE_CLOSED);
        }
        match short_circuit {
            Some(reason) => phases.push(PhaseResult::skipped(NightlyPhase::Integrating, reason)),
            None => {
                let result = self.integrate_phase(&ctx, &patterns, &mut metrics);
                log_phase(&result);
                phases.push(result);
            }
        }

        // Phase 3
        if short_circuit.is_none() && !(ctx.keep_running)() {
            short_circuit = Some(GATE_CLOSED);
        }
        match short_circuit {
            Some(reason) => phases.push(PhaseResult::skipped(NightlyPhase::UpdatingStructure, reason)),
            None => {
                let result = self.structure_phase(&ctx, &mut batches).await;
                log_phase(&result);
                phases.push(result);
            }
        }
        metrics.batches_applied = batches
            .iter()
            .filter(|b: &&BatchReport| matches!(b.outcome, BatchOutcome::Applied { .. }))
            .count();
        metrics.batches_rolled_back = batches
            .iter()
            .filter(|b: &&BatchReport| matches!(b.outcome, BatchOutcome::RolledBack { .. }))
            .count();

        // Phase 4
        let pattern_count = patterns.len();
        let (cleanup_result, archive_entry, metrics) =
            self.cleanup_phase(&ctx, day, experiences, patterns, metrics);
        log_phase(&cleanup_result);
        phases.push(cleanup_result);

        let report = NightlyReport {
            started_at,
            completed_at: Utc::now(),
            completed: archive_entry.is_some() && phases.iter().all(|p| p.status.is_completed()),
            phases,
            batches,
            patterns: pattern_count,
            archive_entry,
            metrics,
        };

        info!(
            phase = %NightlyPhase::Idle,
            completed = report.completed,
            summary = %report.summary(),
            "Nightly integration finished"
        );
        report
    }

    fn extract_phase(&self, experiences: &[Experience]) -> (PhaseResult, Vec<Pattern>) {
        let start = Instant::now();
        let patterns = self.patterns.extract(experiences);

        let mut by_type: BTreeMap<PatternType, usize> = BTreeMap::new();
        for p in &patterns {
            *by_type.entry(p.pattern_type).or_default() += 1;
        }
        let actions = by_type
            .iter()
            .map(|(kind, n)| format!("Found {} {} patterns", n, kind))
            .collect();

        let result = PhaseResult {
            phase: NightlyPhase::Extracting,
            status: PhaseStatus::Completed,
            duration_ms: start.elapsed().as_millis() as u64,
            items_processed: experiences.len(),
            actions,
        };
        (result, patterns)
    }

    fn integrate_phase(
        &self,
        ctx: &NightlyContext<'_>,
        patterns: &[Pattern],
        metrics: &mut DailyMetrics,
    ) -> PhaseResult {
        let start = Instant::now();
        let summary = ctx
            .knowledge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .integrate(patterns);
        metrics.knowledge_touched = summary.touched.len();
        metrics.conflicts_resolved = summary.conflicts.len();

        for conflict in &summary.conflicts {
            info!(
                concept = %conflict.concept,
                replaced = %conflict.replaced,
                kept = %conflict.kept,
                "Resolved contradicting sequence"
            );
        }

        let linked = self.link_memories(ctx.store, patterns);

        let mut actions = vec![
            format!("Updated {} knowledge entries ({} new)", summary.touched.len(), summary.created),
            format!("{} patterns extended existing knowledge", summary.extended),
            format!("Resolved {} conflicts", summary.conflicts.len()),
        ];
        if linked > 0 {
            actions.push(format!("Added {} memory associations", linked));
        }

        PhaseResult {
            phase: NightlyPhase::Integrating,
            status: PhaseStatus::Completed,
            duration_ms: start.elapsed().as_millis() as u64,
            items_processed: patterns.len(),
            actions,
        }
    }

    /// Give active memories mentioning one side of a strong pair the other side
    fn link_memories(&self, store: &MemoryStore, patterns: &[Pattern]) -> usize {
        let pairs: Vec<(&str, &str)> = patterns
            .iter()
            .filter(|p| p.pattern_type == PatternType::CoOccurrence)
            .filter_map(|p| match p.concepts.as_slice() {
                [a, b] => Some((a.as_str(), b.as_str())),
                _ => None,
            })
            .collect();
        if pairs.is_empty() {
            return 0;
        }

        let mut added = 0;
        for (_, snapshot) in store.snapshot_all() {
            for memory in snapshot.iter() {
                let concepts = self.extractor.extract(&memory.content);
                let mentions = |c: &str| concepts.iter().any(|x| x == c);
                for (a, b) in &pairs {
                    if mentions(a) {
                        added += memory.add_associations([*b]);
                    }
                    if mentions(b) {
                        added += memory.add_associations([*a]);
                    }
                }
            }
        }
        added
    }

    async fn structure_phase(
        &self,
        ctx: &NightlyContext<'_>,
        reports: &mut Vec<BatchReport>,
    ) -> PhaseResult {
        let start = Instant::now();
        let batch_size = self.config.nightly.training_batch_size.max(1);

        let pending: Vec<PendingExample> = {
            let kb = ctx.knowledge.lock().unwrap_or_else(PoisonError::into_inner);
            kb.pending_training()
                .into_iter()
                .map(|entry| PendingExample {
                    concept: entry.concept.clone(),
                    revision: entry.revision,
                    example: entry.to_training_example(),
                })
                .collect()
        };

        let chunks: Vec<&[PendingExample]> = pending.chunks(batch_size).collect();
        let run_id = Uuid::new_v4().simple().to_string();
        let mut status = PhaseStatus::Completed;
        let mut consecutive_failures = 0;
        let mut stop: Option<PhaseStatus> = None;

        for (index, chunk) in chunks.iter().enumerate() {
            let batch = TrainingBatch {
                id: format!("nightly-{}-{}", run_id, index),
                source: BatchSource::Nightly,
                index,
                examples: chunk.iter().map(|p| p.example.clone()).collect(),
            };

            if let Some(reason) = &stop {
                reports.push(BatchReport {
                    id: batch.id,
                    index,
                    examples: batch.examples.len(),
                    outcome: BatchOutcome::Skipped,
                });
                status = reason.clone();
                continue;
            }

            let outcome = match apply_batch(ctx.trainer, &batch).await {
                Ok(loss) => {
                    consecutive_failures = 0;
                    let mut kb = ctx.knowledge.lock().unwrap_or_else(PoisonError::into_inner);
                    for p in chunk.iter() {
                        kb.mark_trained(&p.concept, p.revision);
                    }
                    BatchOutcome::Applied { loss }
                }
                Err(failure) => {
                    consecutive_failures += 1;
                    if failure.unreachable {
                        stop = Some(PhaseStatus::Failed {
                            reason: failure.reason.clone(),
                        });
                    } else if consecutive_failures >= MAX_CONSECUTIVE_ROLLBACKS {
                        stop = Some(PhaseStatus::Partial {
                            reason: "repeated validation failure".to_string(),
                        });
                    }
                    BatchOutcome::RolledBack {
                        reason: failure.reason,
                    }
                }
            };

            reports.push(BatchReport {
                id: batch.id,
                index,
                examples: batch.examples.len(),
                outcome,
            });

            let more = index + 1 < chunks.len();
            if more && stop.is_none() && !(ctx.keep_running)() {
                info!(completed = index + 1, remaining = chunks.len() - index - 1, "Gate closed between training batches");
                stop = Some(PhaseStatus::Partial {
                    reason: GATE_CLOSED.to_string(),
                });
            }
            if !more {
                if let Some(reason) = &stop {
                    status = reason.clone();
                }
            }
        }

        let applied = reports
            .iter()
            .filter(|b| matches!(b.outcome, BatchOutcome::Applied { .. }))
            .count();
        PhaseResult {
            phase: NightlyPhase::UpdatingStructure,
            status,
            duration_ms: start.elapsed().as_millis() as u64,
            items_processed: pending.len(),
            actions: vec![format!("Applied {} of {} batches", applied, chunks.len())],
        }
    }

    fn cleanup_phase(
        &self,
        ctx: &NightlyContext<'_>,
        day: chrono::NaiveDate,
        experiences: Vec<Experience>,
        patterns: Vec<Pattern>,
        mut metrics: DailyMetrics,
    ) -> (PhaseResult, Option<Uuid>, DailyMetrics) {
        let start = Instant::now();
        let mut actions = Vec::new();

        for tier in Tier::ALL {
            if ctx.store.len(tier) > self.config.capacity_for(tier) {
                let result = self.consolidate_tier(ctx.store, ctx.archive, tier);
                actions.push(format!("Archived {} from {}", result.archived.len(), tier));
            }
        }
        metrics.tier_sizes = ctx.store.sizes().into_iter().collect();

        let consumed = experiences.len();
        let consumed_ids: HashSet<Uuid> = experiences.iter().map(|e| e.id).collect();
        let (status, entry_id) = match ctx.archive.seal(day, experiences, patterns, metrics.clone()) {
            Ok(entry) => {
                metrics = entry.daily_metrics.clone();
                ctx.accumulator
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear_consumed(&consumed_ids);
                actions.push(format!(
                    "Sealed {} with {} memories and {} experiences",
                    entry.date,
                    entry.archived_memories.len(),
                    consumed
                ));
                (PhaseStatus::Completed, Some(entry.id))
            }
            Err(e) => {
                warn!(error = %e, pending = ctx.archive.pending_len(), "Archive write failed, keeping the day for the next cycle");
                (PhaseStatus::Failed { reason: e.to_string() }, None)
            }
        };

        let result = PhaseResult {
            phase: NightlyPhase::CleaningUp,
            status,
            duration_ms: start.elapsed().as_millis() as u64,
            items_processed: consumed,
            actions,
        };
        (result, entry_id, metrics)
    }
}

/// Why a batch was rolled back
pub(crate) struct BatchFailure {
    pub reason: String,
    /// The trainer could not be reached at all
    pub unreachable: bool,
}

/// One guarded training step: train, validate, roll back on failure.
/// Returns the reported loss of an accepted batch.
pub(crate) async fn apply_batch(
    trainer: &dyn Trainer,
    batch: &TrainingBatch,
) -> Result<Option<f64>, BatchFailure> {
    let result = match trainer.train_step(batch).await {
        Ok(outcome) => outcome
            .validate()
            .map(|()| outcome.loss)
            .map_err(|reason| BatchFailure {
                reason,
                unreachable: false,
            }),
        Err(CollaboratorError::Unreachable(msg)) => Err(BatchFailure {
            reason: format!("trainer unreachable: {}", msg),
            unreachable: true,
        }),
        Err(e) => Err(BatchFailure {
            reason: e.to_string(),
            unreachable: false,
        }),
    };

    if let Err(failure) = &result {
        warn!(
            batch = %batch.id,
            source = ?batch.source,
            index = batch.index,
            reason = %failure.reason,
            "Training batch failed validation, rolling back"
        );
        if let Err(e) = trainer.rollback(&batch.id).await {
            warn!(batch = %batch.id, error = %e, "Trainer rollback failed");
        }
    }
    result
}

fn log_phase(result: &PhaseResult) {
    match &result.status {
        PhaseStatus::Completed => info!(
            phase = %result.phase,
            duration_ms = result.duration_ms,
            items = result.items_processed,
            "Nightly phase completed"
        ),
        other => warn!(
            phase = %result.phase,
            duration_ms = result.duration_ms,
            status = ?other,
            "Nightly phase did not complete"
        ),
    }
}
