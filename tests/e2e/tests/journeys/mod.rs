//! Journey Tests
//!
//! End-to-end workflows through the public `MemorySystem` API, backed by a
//! real SQLite archive in a temp directory:
//!
//! - `input_to_archive`: foreground inputs, tier bounds, demotion into the archive
//! - `nightly_integration`: the four-phase pipeline and its failure paths
//! - `background_scheduling`: gate checks, single-cycle guarantee, shutdown
//! - `restart_recovery`: snapshots and history surviving a reopen
//!
//! This file holds the short smoke journey; the others run as their own
//! test targets.

use somnia_core::{ContextItem, Tier};
use somnia_e2e_tests::harness::TestSystemManager;

#[tokio::test]
async fn test_day_in_the_life() {
    let harness = TestSystemManager::new_temp();

    let first = harness.process("brew #coffee at home").await;
    assert_eq!(first.output, "Noted: brew #coffee at home");
    assert_eq!(first.tier, Tier::Working);
    assert!(first.associations.is_empty());

    // Same words embed identically, so the new memory inherits the old one's concepts
    let second = harness.process("brew #coffee at home").await;
    assert!(second.retrieved >= 1);
    assert_eq!(second.associations, vec!["coffee".to_string()]);

    let fact = harness.process_kind("the kettle is a #appliance", "fact").await;
    assert_eq!(fact.tier, Tier::Semantic);

    // The stored memory is visible to the next prompt
    harness.process("anything else").await;
    let last_prompt = harness.generator.prompts().pop().unwrap();
    assert!(last_prompt.contains("brew #coffee at home"));
    assert!(last_prompt.ends_with("Current Input: anything else"));

    harness
        .system
        .add_context(ContextItem::new("where is the kettle", "on the counter"));
    let answer = harness.system.query("where is the kettle").await.unwrap();
    assert_eq!(answer, "Noted: where is the kettle");

    let stats = harness.system.stats();
    assert_eq!(stats.tiers[&Tier::Working], 3);
    assert_eq!(stats.tiers[&Tier::Semantic], 1);
    assert_eq!(stats.context_items, 5);
    assert_eq!(stats.experiences_today, 4);
    assert_eq!(stats.pending_archive, 0);
    assert!(stats.activity.total_events >= 5);
}
