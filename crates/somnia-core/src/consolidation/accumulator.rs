//! Daily experience accumulator
//!
//! Every foreground interaction is recorded here and consumed by the next
//! nightly integration. Only the experiences a cycle actually read are
//! cleared afterwards, so interactions arriving mid-cycle roll into the
//! next day. The buffer is bounded: while no cycle runs, the oldest
//! experiences give way to new ones.

use std::collections::HashSet;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::DEFAULT_MAX_DAY_EXPERIENCES;
use crate::memory::Tier;

/// One interaction as seen by nightly integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experience {
    pub id: Uuid,
    pub input: String,
    pub output: String,
    /// Extracted concepts, first-seen order
    pub concepts: Vec<String>,
    pub tier: Tier,
    pub timestamp: DateTime<Utc>,
}

impl Experience {
    pub fn new(
        input: impl Into<String>,
        output: impl Into<String>,
        concepts: Vec<String>,
        tier: Tier,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            input: input.into(),
            output: output.into(),
            concepts,
            tier,
            timestamp: Utc::now(),
        }
    }

    /// The concept a temporal sequence is keyed on
    pub fn primary_concept(&self) -> Option<&str> {
        self.concepts.first().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct DailyAccumulator {
    day: NaiveDate,
    experiences: Vec<Experience>,
    max_experiences: usize,
    /// Dropped since the buffer was last drained
    dropped: usize,
}

impl Default for DailyAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DAY_EXPERIENCES)
    }
}

impl DailyAccumulator {
    pub fn new(max_experiences: usize) -> Self {
        Self {
            day: Local::now().date_naive(),
            experiences: Vec::new(),
            max_experiences: max_experiences.max(1),
            dropped: 0,
        }
    }

    /// Local date the current batch of experiences started on
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn record(&mut self, experience: Experience) {
        if self.experiences.len() >= self.max_experiences {
            let overflow = self.experiences.len() + 1 - self.max_experiences;
            self.experiences.drain(..overflow);
            if self.dropped == 0 {
                warn!(
                    max = self.max_experiences,
                    "Daily experience buffer full, dropping the oldest until the next nightly run"
                );
            }
            self.dropped += overflow;
            self.refresh_day();
        }
        if self.experiences.is_empty() {
            self.day = experience.timestamp.with_timezone(&Local).date_naive();
        }
        self.experiences.push(experience);
    }

    /// Experiences dropped to the bound since the buffer last emptied
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn experiences(&self) -> &[Experience] {
        &self.experiences
    }

    pub fn len(&self) -> usize {
        self.experiences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiences.is_empty()
    }

    /// Drop the experiences an archive entry now holds
    pub fn clear_consumed(&mut self, consumed: &HashSet<Uuid>) {
        self.experiences.retain(|e| !consumed.contains(&e.id));
        if self.experiences.is_empty() {
            self.dropped = 0;
        }
        self.refresh_day();
    }

    /// Put back experiences recovered from a checkpoint, ahead of anything
    /// recorded since startup
    pub fn restore(&mut self, day: NaiveDate, recovered: Vec<Experience>) {
        if recovered.is_empty() {
            return;
        }
        let known: HashSet<Uuid> = self.experiences.iter().map(|e| e.id).collect();
        let mut merged: Vec<Experience> = recovered
            .into_iter()
            .filter(|e| !known.contains(&e.id))
            .collect();
        merged.append(&mut self.experiences);
        let overflow = merged.len().saturating_sub(self.max_experiences);
        if overflow > 0 {
            warn!(dropped = overflow, "Recovered experiences exceed the daily buffer");
            merged.drain(..overflow);
            self.dropped += overflow;
        }
        self.experiences = merged;
        self.refresh_day();
        if overflow == 0 {
            self.day = self.day.min(day);
        }
    }

    fn refresh_day(&mut self) {
        self.day = match self.experiences.first() {
            Some(first) => first.timestamp.with_timezone(&Local).date_naive(),
            None => Local::now().date_naive(),
        };
    }
}
