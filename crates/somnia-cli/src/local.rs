//! Local stand-ins for the external collaborators
//!
//! Good enough to exercise the engine end to end without a model on the
//! device: a feature-hashing embedder, a generator that acknowledges the
//! input, and a trainer that accepts every batch.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use somnia_core::{CollaboratorError, Embedder, Generator, TrainOutcome, Trainer, TrainingBatch};

/// Bag-of-words vectors via the hashing trick, L2-normalized
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Ok(self.vector(text))
    }
}

/// Replies with an acknowledgement of the current input
pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let input = prompt
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix("Current Input: ").or_else(|| l.strip_prefix("Question: ")))
            .unwrap_or(prompt);
        Ok(format!("Noted: {}", input.trim()))
    }
}

/// Accepts every batch without touching any weights
pub struct NoopTrainer;

#[async_trait]
impl Trainer for NoopTrainer {
    async fn train_step(&self, batch: &TrainingBatch) -> Result<TrainOutcome, CollaboratorError> {
        tracing::debug!(batch = %batch.id, examples = batch.len(), "Skipping training step");
        Ok(TrainOutcome::ok(0.0))
    }
}
