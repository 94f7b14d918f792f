//! Input classification
//!
//! Which tier a new memory lands in, how important it is, and which
//! concepts it mentions are all heuristics. They sit behind small traits so
//! hosts can swap in their own rules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::Tier;

/// Importance used when neither the input nor the classifier supplies one
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// Words carrying no concept
const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "between", "both", "could",
    "does", "doing", "down", "during", "each", "from", "further", "have", "having", "here",
    "into", "just", "more", "most", "only", "other", "over", "same", "should", "some", "such",
    "than", "that", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "under", "until", "very", "want", "were", "what", "when", "where", "which",
    "while", "will", "with", "would", "your", "yours",
];

/// A foreground input to the memory system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub text: String,
    /// Caller-declared shape, e.g. "interaction", "fact", "procedure"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Caller-declared importance in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Input {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }
}

// ============================================================================
// TIER CLASSIFICATION
// ============================================================================

/// Decides tier and importance for a new memory
pub trait TierClassifier: Send + Sync {
    fn classify(&self, input: &Input) -> Tier;

    fn importance(&self, input: &Input, _output: &str) -> f64 {
        input
            .importance
            .filter(|v| v.is_finite())
            .unwrap_or(DEFAULT_IMPORTANCE)
            .clamp(0.0, 1.0)
    }
}

/// Keyword rules over the declared kind and the text
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    fn from_kind(kind: &str) -> Option<Tier> {
        match kind.trim().to_lowercase().as_str() {
            "interaction" | "conversation" | "chat" | "event" | "experience" => Some(Tier::Episodic),
            "fact" | "reference" | "definition" | "knowledge" => Some(Tier::Semantic),
            "procedure" | "instruction" | "howto" | "how-to" | "skill" => Some(Tier::Procedural),
            "working" | "scratch" => Some(Tier::Working),
            _ => None,
        }
    }

    fn looks_procedural(text: &str) -> bool {
        let numbered_lines = text
            .lines()
            .filter(|l| {
                let l = l.trim_start();
                let digits = l.chars().take_while(|c| c.is_ascii_digit()).count();
                digits > 0 && matches!(l[digits..].chars().next(), Some('.') | Some(')'))
            })
            .count();
        text.starts_with("how to ") || text.contains("step 1") || numbered_lines >= 2
    }

    fn looks_factual(text: &str) -> bool {
        text.starts_with("fact:")
            || text.contains(" is defined as ")
            || text.contains(" is a ")
            || text.contains(" is an ")
            || text.contains(" means ")
    }

    fn looks_episodic(text: &str) -> bool {
        ["yesterday", "today", "this morning", "just now", "i met", "we talked", "remember when"]
            .iter()
            .any(|cue| text.contains(cue))
    }
}

impl TierClassifier for HeuristicClassifier {
    fn classify(&self, input: &Input) -> Tier {
        let declared = input.kind.as_deref().or_else(|| {
            input
                .metadata
                .get("type")
                .and_then(Value::as_str)
        });
        if let Some(tier) = declared.and_then(Self::from_kind) {
            return tier;
        }

        let text = input.text.to_lowercase();
        if Self::looks_procedural(&text) {
            Tier::Procedural
        } else if Self::looks_factual(&text) {
            Tier::Semantic
        } else if Self::looks_episodic(&text) {
            Tier::Episodic
        } else {
            Tier::Working
        }
    }
}

// ============================================================================
// CONCEPT EXTRACTION
// ============================================================================

/// Pulls concept identifiers out of free text
pub trait ConceptExtractor: Send + Sync {
    /// Distinct concepts in first-seen order
    fn extract(&self, text: &str) -> Vec<String>;
}

/// Lowercased content words longer than three characters
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordExtractor;

impl ConceptExtractor for KeywordExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        text.split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.chars().count() > 3)
            .filter(|w| !STOP_WORDS.contains(&w.as_str()))
            .filter(|w| seen.insert(w.clone()))
            .collect()
    }
}
