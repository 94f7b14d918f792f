//! Consolidation score
//!
//! `score = w_i * importance + w_r * recency + w_q * ln(1 + retrievals) + w_a * associations`
//!
//! - recency halves every `recency_half_life_days`
//! - associations saturate at `association_saturation` concepts

use chrono::{DateTime, Utc};

use crate::config::ScoreWeights;
use crate::memory::Memory;

/// The inputs of one memory's score, frozen at snapshot time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub importance: f64,
    pub timestamp: DateTime<Utc>,
    pub retrieval_count: u64,
    pub association_count: usize,
}

impl ScoreInputs {
    pub fn of(memory: &Memory) -> Self {
        Self {
            importance: memory.importance,
            timestamp: memory.timestamp,
            retrieval_count: memory.retrieval_count(),
            association_count: memory.association_count(),
        }
    }
}

/// Recency in (0, 1]; future timestamps count as brand new
pub fn recency(timestamp: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let age_days = (now - timestamp).num_milliseconds().max(0) as f64 / 86_400_000.0;
    if half_life_days <= 0.0 {
        return if age_days == 0.0 { 1.0 } else { 0.0 };
    }
    0.5_f64.powf(age_days / half_life_days)
}

pub fn consolidation_score(inputs: &ScoreInputs, weights: &ScoreWeights, now: DateTime<Utc>) -> f64 {
    let associations = if weights.association_saturation == 0 {
        0.0
    } else {
        (inputs.association_count as f64 / weights.association_saturation as f64).min(1.0)
    };

    weights.importance * inputs.importance
        + weights.recency * recency(inputs.timestamp, now, weights.recency_half_life_days)
        + weights.retrieval * (inputs.retrieval_count as f64).ln_1p()
        + weights.associations * associations
}
