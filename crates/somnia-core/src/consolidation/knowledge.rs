//! Concept knowledge base (nightly phase 2)
//!
//! Patterns are merged into concept-keyed entries. Every entry carries a
//! revision counter; an entry whose revision is ahead of the last trained
//! revision still needs a structure update.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::patterns::{Pattern, PatternType};
use crate::collaborators::TrainingExample;

/// Accumulated knowledge about one concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub concept: String,
    /// Experiences the concept recurred in, summed over nights
    pub frequency: usize,
    /// Concepts strongly co-occurring with this one
    pub associations: BTreeSet<String>,
    /// Concept that most recently followed this one in a sequence
    pub follows: Option<String>,
    pub importance: f64,
    pub revision: u64,
    pub trained_revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    fn new(concept: &str) -> Self {
        Self {
            concept: concept.to_string(),
            frequency: 0,
            associations: BTreeSet::new(),
            follows: None,
            importance: 0.0,
            revision: 0,
            trained_revision: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn needs_training(&self) -> bool {
        self.revision > self.trained_revision
    }

    pub fn to_training_example(&self) -> TrainingExample {
        let mut output = format!("{} (seen {} times)", self.concept, self.frequency);
        if let Some(next) = &self.follows {
            output.push_str(&format!("; usually followed by {}", next));
        }
        if !self.associations.is_empty() {
            let related: Vec<&str> = self.associations.iter().map(String::as_str).collect();
            output.push_str(&format!("; related to {}", related.join(", ")));
        }

        let mut metadata = Map::new();
        metadata.insert("concept".into(), Value::String(self.concept.clone()));
        metadata.insert("revision".into(), Value::from(self.revision));
        metadata.insert("importance".into(), Value::from(self.importance));

        TrainingExample {
            input: format!("What do you know about {}?", self.concept),
            output,
            metadata,
        }
    }
}

/// A direct contradiction resolved in favour of the later pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub concept: String,
    pub replaced: String,
    pub kept: String,
    pub pattern_id: String,
}

/// What one integration pass changed
#[derive(Debug, Clone, Default)]
pub struct IntegrationSummary {
    /// Concepts whose entry changed, first-touched order
    pub touched: Vec<String>,
    pub created: usize,
    /// Patterns that landed on concepts already known before the pattern
    pub extended: usize,
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: BTreeMap<String, KnowledgeEntry>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, concept: &str) -> Option<&KnowledgeEntry> {
        self.entries.get(concept)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &KnowledgeEntry> {
        self.entries.values()
    }

    /// Existing entries for any of the given concepts
    pub fn related(&self, concepts: &[String]) -> Vec<&KnowledgeEntry> {
        concepts.iter().filter_map(|c| self.entries.get(c)).collect()
    }

    /// Merge patterns in descending importance order.
    ///
    /// A sequence asserting `A -> B` when the entry for `A` already says
    /// `A -> C` is a contradiction: the pattern applied last wins.
    pub fn integrate(&mut self, patterns: &[Pattern]) -> IntegrationSummary {
        let mut ordered: Vec<&Pattern> = patterns.iter().collect();
        ordered.sort_by(|a, b| b.importance.total_cmp(&a.importance));

        let mut summary = IntegrationSummary::default();
        let mut touched = BTreeSet::new();

        for pattern in ordered {
            if !self.related(&pattern.concepts).is_empty() {
                summary.extended += 1;
            }
            let changed = match pattern.pattern_type {
                PatternType::Recurring => self.merge_recurring(pattern, &mut summary),
                PatternType::CoOccurrence => self.merge_co_occurrence(pattern, &mut summary),
                PatternType::Sequential => self.merge_sequence(pattern, &mut summary),
            };

            for concept in changed {
                if let Some(entry) = self.entries.get_mut(&concept) {
                    entry.revision += 1;
                    entry.importance = entry.importance.max(pattern.importance);
                    entry.updated_at = Utc::now();
                }
                if touched.insert(concept.clone()) {
                    summary.touched.push(concept);
                }
            }
        }

        summary
    }

    fn entry_mut(&mut self, concept: &str, summary: &mut IntegrationSummary) -> &mut KnowledgeEntry {
        if !self.entries.contains_key(concept) {
            summary.created += 1;
        }
        self.entries
            .entry(concept.to_string())
            .or_insert_with(|| KnowledgeEntry::new(concept))
    }

    fn merge_recurring(&mut self, pattern: &Pattern, summary: &mut IntegrationSummary) -> Vec<String> {
        let Some(concept) = pattern.concepts.first() else {
            return Vec::new();
        };
        self.entry_mut(concept, summary).frequency += pattern.occurrences;
        vec![concept.clone()]
    }

    fn merge_co_occurrence(&mut self, pattern: &Pattern, summary: &mut IntegrationSummary) -> Vec<String> {
        let [a, b] = pattern.concepts.as_slice() else {
            return Vec::new();
        };
        let mut changed = Vec::new();
        if self.entry_mut(a, summary).associations.insert(b.clone()) {
            changed.push(a.clone());
        }
        if self.entry_mut(b, summary).associations.insert(a.clone()) {
            changed.push(b.clone());
        }
        changed
    }

    fn merge_sequence(&mut self, pattern: &Pattern, summary: &mut IntegrationSummary) -> Vec<String> {
        let mut changed = Vec::new();
        for step in pattern.concepts.windows(2) {
            let (from, to) = (&step[0], &step[1]);
            if from == to {
                continue;
            }
            let entry = self.entry_mut(from, summary);
            match entry.follows.replace(to.clone()) {
                Some(previous) if previous == *to => continue,
                Some(previous) => summary.conflicts.push(Conflict {
                    concept: from.clone(),
                    replaced: previous,
                    kept: to.clone(),
                    pattern_id: pattern.id.clone(),
                }),
                None => {}
            }
            changed.push(from.clone());
        }
        changed
    }

    /// Entries with untrained revisions, most important first
    pub fn pending_training(&self) -> Vec<&KnowledgeEntry> {
        let mut pending: Vec<&KnowledgeEntry> =
            self.entries.values().filter(|e| e.needs_training()).collect();
        pending.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then_with(|| a.concept.cmp(&b.concept))
        });
        pending
    }

    /// Load entries from a checkpoint. Concepts learned since startup win.
    pub fn restore(&mut self, entries: Vec<KnowledgeEntry>) -> usize {
        let mut restored = 0;
        for entry in entries {
            if !self.entries.contains_key(&entry.concept) {
                self.entries.insert(entry.concept.clone(), entry);
                restored += 1;
            }
        }
        restored
    }

    /// Record that `concept` was trained at `revision`
    pub fn mark_trained(&mut self, concept: &str, revision: u64) {
        if let Some(entry) = self.entries.get_mut(concept) {
            entry.trained_revision = entry.trained_revision.max(revision.min(entry.revision));
        }
    }
}
