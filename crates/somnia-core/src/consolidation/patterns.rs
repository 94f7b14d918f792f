//! Pattern extraction (nightly phase 1)
//!
//! Three detectors over the day's experiences:
//! - recurring concepts: seen in at least `recurring_min_occurrences` experiences
//! - temporal sequences: primary concepts of `sequence_window` consecutive
//!   experiences, significant when the same signature repeats
//! - co-occurrence: concept pairs sharing at least `strong_association_ratio`
//!   of the day's experiences

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::accumulator::Experience;
use crate::config::NightlyConfig;

/// A sequence signature must repeat this often to count
const SEQUENCE_MIN_REPEATS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// One concept recurring across the day
    Recurring,
    /// Concepts following each other in order
    Sequential,
    /// Concepts appearing together
    CoOccurrence,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Recurring => "recurring",
            PatternType::Sequential => "sequential",
            PatternType::CoOccurrence => "cooccurrence",
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pattern found in one day of experiences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    /// Stable key, e.g. `sequential:wake>coffee>email`
    pub id: String,
    pub pattern_type: PatternType,
    /// One concept for recurring, the ordered signature for sequential,
    /// the sorted pair for co-occurrence
    pub concepts: Vec<String>,
    pub occurrences: usize,
    /// Share of the day this pattern explains, in [0, 1]
    pub importance: f64,
    pub experience_ids: Vec<Uuid>,
    pub discovered_at: DateTime<Utc>,
}

impl Pattern {
    fn new(
        pattern_type: PatternType,
        concepts: Vec<String>,
        occurrences: usize,
        importance: f64,
        experience_ids: Vec<Uuid>,
    ) -> Self {
        let sep = match pattern_type {
            PatternType::Sequential => ">",
            _ => "+",
        };
        Self {
            id: format!("{}:{}", pattern_type, concepts.join(sep)),
            pattern_type,
            concepts,
            occurrences,
            importance: importance.clamp(0.0, 1.0),
            experience_ids,
            discovered_at: Utc::now(),
        }
    }
}

/// Runs the three detectors with one configuration
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    min_occurrences: usize,
    window: usize,
    strong_ratio: f64,
}

impl PatternExtractor {
    pub fn new(config: &NightlyConfig) -> Self {
        Self {
            min_occurrences: config.recurring_min_occurrences.max(1),
            window: config.sequence_window.max(2),
            strong_ratio: config.strong_association_ratio,
        }
    }

    /// Every pattern of the day, most important first
    pub fn extract(&self, experiences: &[Experience]) -> Vec<Pattern> {
        let mut patterns = self.recurring_concepts(experiences);
        patterns.extend(self.temporal_sequences(experiences));
        patterns.extend(self.co_occurrences(experiences));
        patterns.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then_with(|| a.id.cmp(&b.id))
        });
        patterns
    }

    pub fn recurring_concepts(&self, experiences: &[Experience]) -> Vec<Pattern> {
        let n = experiences.len();
        let mut seen: BTreeMap<&str, Vec<Uuid>> = BTreeMap::new();
        for exp in experiences {
            for concept in distinct(&exp.concepts) {
                seen.entry(concept).or_default().push(exp.id);
            }
        }

        seen.into_iter()
            .filter(|(_, ids)| ids.len() >= self.min_occurrences)
            .map(|(concept, ids)| {
                let count = ids.len();
                Pattern::new(
                    PatternType::Recurring,
                    vec![concept.to_string()],
                    count,
                    count as f64 / n as f64,
                    ids,
                )
            })
            .collect()
    }

    pub fn temporal_sequences(&self, experiences: &[Experience]) -> Vec<Pattern> {
        let n = experiences.len();
        if n < self.window {
            return Vec::new();
        }

        let mut signatures: BTreeMap<Vec<&str>, Vec<Uuid>> = BTreeMap::new();
        for window in experiences.windows(self.window) {
            let signature: Option<Vec<&str>> =
                window.iter().map(Experience::primary_concept).collect();
            if let Some(signature) = signature {
                // first experience marks the occurrence
                signatures.entry(signature).or_default().push(window[0].id);
            }
        }

        signatures
            .into_iter()
            .filter(|(_, ids)| ids.len() >= SEQUENCE_MIN_REPEATS)
            .map(|(signature, ids)| {
                let count = ids.len();
                Pattern::new(
                    PatternType::Sequential,
                    signature.into_iter().map(str::to_string).collect(),
                    count,
                    (count * self.window) as f64 / n as f64,
                    ids,
                )
            })
            .collect()
    }

    pub fn co_occurrences(&self, experiences: &[Experience]) -> Vec<Pattern> {
        let n = experiences.len();
        if n == 0 {
            return Vec::new();
        }

        let mut pairs: BTreeMap<(&str, &str), Vec<Uuid>> = BTreeMap::new();
        for exp in experiences {
            let concepts: Vec<&str> = distinct(&exp.concepts).collect();
            for (i, a) in concepts.iter().enumerate() {
                for b in &concepts[i + 1..] {
                    let key = if a < b { (*a, *b) } else { (*b, *a) };
                    pairs.entry(key).or_default().push(exp.id);
                }
            }
        }

        let min_count = self.strong_ratio * n as f64;
        pairs
            .into_iter()
            .filter(|(_, ids)| ids.len() as f64 >= min_count)
            .map(|((a, b), ids)| {
                let count = ids.len();
                Pattern::new(
                    PatternType::CoOccurrence,
                    vec![a.to_string(), b.to_string()],
                    count,
                    count as f64 / n as f64,
                    ids,
                )
            })
            .collect()
    }
}

fn distinct(concepts: &[String]) -> impl Iterator<Item = &str> {
    let mut seen = BTreeSet::new();
    concepts
        .iter()
        .map(String::as_str)
        .filter(move |c| seen.insert(*c))
}
