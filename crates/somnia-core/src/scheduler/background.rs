//! Background cycle scheduler
//!
//! Owns the single mutable cycle state. A cycle starts only when its gate
//! is open and no other cycle is running; while it runs the gate is
//! re-checked at every batch boundary and the cycle stops after the
//! current batch once a condition no longer holds.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::gate::{CycleKind, DeviceMonitor, GateDecision, GateViolation, evaluate_gate};
use crate::collaborators::{BatchSource, TrainingBatch, TrainingExample};
use crate::consolidation::{BatchOutcome, BatchReport, NightlyReport, apply_batch};
use crate::memory::ContextItem;
use crate::system::MemorySystem;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleState {
    Idle,
    Running {
        kind: CycleKind,
        started_at: DateTime<Utc>,
    },
}

/// Outcome of a light background-learning cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightCycleReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub batches: Vec<BatchReport>,
    /// Context items sent to the trainer
    pub items: usize,
    /// Stopped at a batch boundary because the gate closed
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    Light(LightCycleReport),
    Nightly(Box<NightlyReport>),
}

/// What a start request did
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Completed(CycleReport),
    /// Another cycle holds the state; nothing started
    AlreadyRunning,
    ConditionNotMet(Vec<GateViolation>),
}

/// Resets the cycle state when a cycle ends, however it ends
struct RunningGuard<'a> {
    state: &'a Mutex<CycleState>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = CycleState::Idle;
    }
}

pub struct BackgroundScheduler {
    system: Arc<MemorySystem>,
    device: Arc<dyn DeviceMonitor>,
    state: Mutex<CycleState>,
    /// Local date of the last nightly run
    last_nightly: Mutex<Option<NaiveDate>>,
    /// Newest context item already sent by a light cycle
    light_watermark: Mutex<Option<DateTime<Utc>>>,
    light_runs: Mutex<u64>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for BackgroundScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundScheduler")
            .field("state", &self.state())
            .field("last_nightly", &self.last_nightly())
            .finish()
    }
}

impl BackgroundScheduler {
    pub fn new(system: Arc<MemorySystem>, device: Arc<dyn DeviceMonitor>) -> Self {
        let last_nightly = system
            .last_nightly_run()
            .map(|run| run.started_at.with_timezone(&Local).date_naive());
        let (shutdown, _) = watch::channel(false);

        Self {
            system,
            device,
            state: Mutex::new(CycleState::Idle),
            last_nightly: Mutex::new(last_nightly),
            light_watermark: Mutex::new(None),
            light_runs: Mutex::new(0),
            shutdown,
        }
    }

    pub fn state(&self) -> CycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_nightly(&self) -> Option<NaiveDate> {
        *self.last_nightly.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn evaluate(&self, kind: CycleKind) -> GateDecision {
        evaluate_gate(kind, &self.device.device_state(), self.system.config())
    }

    fn keep_running(&self, kind: CycleKind) -> bool {
        !*self.shutdown.borrow() && self.evaluate(kind).is_open()
    }

    /// Start a cycle of `kind` if the gate is open and nothing is running
    pub async fn run_cycle(&self, kind: CycleKind) -> StartOutcome {
        let _guard = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let CycleState::Running { kind: running, .. } = *state {
                debug!(requested = %kind, running = %running, "Cycle already running");
                return StartOutcome::AlreadyRunning;
            }
            if let GateDecision::Closed(violations) = self.evaluate(kind) {
                let reasons: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
                debug!(kind = %kind, reasons = ?reasons, "Cycle not started");
                return StartOutcome::ConditionNotMet(violations);
            }
            *state = CycleState::Running {
                kind,
                started_at: Utc::now(),
            };
            RunningGuard { state: &self.state }
        };

        info!(kind = %kind, "Background cycle started");
        let keep_running = move || self.keep_running(kind);

        let report = match kind {
            CycleKind::Nightly => {
                let report = self.system.run_nightly_integration(&keep_running).await;
                *self.last_nightly.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Local::now().date_naive());
                CycleReport::Nightly(Box::new(report))
            }
            CycleKind::Light => CycleReport::Light(self.light_cycle(&keep_running).await),
        };

        StartOutcome::Completed(report)
    }

    /// Train on context items newer than the watermark, one batch at a time
    async fn light_cycle(&self, keep_running: &(dyn Fn() -> bool + Send + Sync)) -> LightCycleReport {
        let started_at = Utc::now();
        let config = &self.system.config().background;
        let run = {
            let mut runs = self.light_runs.lock().unwrap_or_else(PoisonError::into_inner);
            *runs += 1;
            *runs
        };

        let watermark = *self.light_watermark.lock().unwrap_or_else(PoisonError::into_inner);
        let items = self.system.context_since(watermark);

        let mut batches = Vec::new();
        let mut sent = 0;
        let mut interrupted = false;

        for (index, chunk) in items
            .chunks(config.batch_items.max(1))
            .take(config.max_batches_per_cycle)
            .enumerate()
        {
            if index > 0 {
                tokio::time::sleep(config.batch_pause()).await;
                if !keep_running() {
                    info!(completed = index, "Light cycle stopped at batch boundary");
                    interrupted = true;
                    break;
                }
            }

            let batch = TrainingBatch {
                id: format!("light-{}-{}", run, index),
                source: BatchSource::Background,
                index,
                examples: chunk.iter().map(context_example).collect(),
            };

            let (outcome, unreachable) = match apply_batch(self.system.trainer(), &batch).await {
                Ok(loss) => (BatchOutcome::Applied { loss }, false),
                Err(failure) => (
                    BatchOutcome::RolledBack {
                        reason: failure.reason,
                    },
                    failure.unreachable,
                ),
            };

            if let Some(last) = chunk.last() {
                *self.light_watermark.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(last.timestamp);
            }
            sent += chunk.len();
            batches.push(BatchReport {
                id: batch.id,
                index,
                examples: chunk.len(),
                outcome,
            });

            if unreachable {
                warn!("Trainer unreachable, ending light cycle");
                interrupted = true;
                break;
            }
        }

        let report = LightCycleReport {
            started_at,
            completed_at: Utc::now(),
            batches,
            items: sent,
            interrupted,
        };
        info!(
            batches = report.batches.len(),
            items = report.items,
            interrupted = report.interrupted,
            "Light cycle finished"
        );
        report
    }

    /// One scheduling decision: nightly once per local date, else light
    pub async fn tick(&self) -> StartOutcome {
        let today = Local::now().date_naive();
        if self.last_nightly() != Some(today) {
            match self.run_cycle(CycleKind::Nightly).await {
                StartOutcome::ConditionNotMet(_) => {}
                outcome => return outcome,
            }
        }
        self.run_cycle(CycleKind::Light).await
    }

    /// Tick every `poll_interval` until [`stop`](Self::stop) is called
    pub fn spawn(self: Arc<Self>, poll_interval: std::time::Duration) -> JoinHandle<()> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            info!(poll_secs = poll_interval.as_secs(), "Background scheduler started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {
                        match self.tick().await {
                            StartOutcome::Completed(CycleReport::Nightly(report)) => {
                                debug!(summary = %report.summary(), "Tick ran nightly integration");
                            }
                            StartOutcome::Completed(CycleReport::Light(report)) => {
                                debug!(batches = report.batches.len(), "Tick ran light cycle");
                            }
                            StartOutcome::AlreadyRunning | StartOutcome::ConditionNotMet(_) => {}
                        }
                    }
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    break;
                }
            }
            info!("Background scheduler stopped");
        })
    }

    /// Ask the loop and any running cycle to stop at the next boundary
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

/// `{inputs, outputs, metadata}` training example from a context item
fn context_example(item: &ContextItem) -> TrainingExample {
    let mut metadata = item.metadata.clone();
    metadata.insert("timestamp".into(), Value::String(item.timestamp.to_rfc3339()));
    TrainingExample {
        input: item.input.clone(),
        output: item.output.clone(),
        metadata,
    }
}
