//! External collaborators
//!
//! The engine never computes embeddings, generates text or trains weights
//! itself. Those capabilities are consumed through three narrow traits.
//! Implementations are expected to fail fast or be bounded externally;
//! the engine does not time them out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure reported by a collaborator
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// The capability could not be reached at all
    #[error("collaborator unreachable: {0}")]
    Unreachable(String),
    /// The capability was reached but the call failed
    #[error("collaborator call failed: {0}")]
    Failed(String),
}

/// Text to fixed-dimension vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
}

/// Prompt to text
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// One guarded weight update per batch
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train_step(&self, batch: &TrainingBatch) -> Result<TrainOutcome, CollaboratorError>;

    /// Undo the effect of a batch that failed validation
    async fn rollback(&self, _batch_id: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

// ============================================================================
// TRAINING TYPES
// ============================================================================

/// Which cycle produced a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchSource {
    /// Nightly structure update from integrated knowledge
    Nightly,
    /// Light background learning from the context buffer
    Background,
}

/// A single supervised example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A batch handed to [`Trainer::train_step`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingBatch {
    pub id: String,
    pub source: BatchSource,
    /// Position of the batch inside its cycle, starting at 0
    pub index: usize,
    pub examples: Vec<TrainingExample>,
}

impl TrainingBatch {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn inputs(&self) -> Vec<&str> {
        self.examples.iter().map(|e| e.input.as_str()).collect()
    }

    pub fn outputs(&self) -> Vec<&str> {
        self.examples.iter().map(|e| e.output.as_str()).collect()
    }
}

/// What a training step reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOutcome {
    pub success: bool,
    #[serde(default)]
    pub loss: Option<f64>,
    #[serde(default)]
    pub diagnostics: String,
}

impl TrainOutcome {
    pub fn ok(loss: f64) -> Self {
        Self {
            success: true,
            loss: Some(loss),
            diagnostics: String::new(),
        }
    }

    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            loss: None,
            diagnostics: diagnostics.into(),
        }
    }

    /// A step is accepted only if it succeeded and any loss is a finite,
    /// non-negative number. Returns the rejection reason otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if !self.success {
            return Err(if self.diagnostics.is_empty() {
                "trainer reported failure".to_string()
            } else {
                self.diagnostics.clone()
            });
        }
        match self.loss {
            Some(loss) if !loss.is_finite() => Err(format!("non-finite loss {}", loss)),
            Some(loss) if loss < 0.0 => Err(format!("negative loss {}", loss)),
            _ => Ok(()),
        }
    }
}
