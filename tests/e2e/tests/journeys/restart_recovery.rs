//! Journey: state surviving a process restart
//!
//! Active tiers come back from their snapshots, the unsealed day and the
//! knowledge base from their checkpoints. Sealed entries and nightly history
//! come back from the archive log.

use std::sync::Arc;

use chrono::{Local, Utc};
use rusqlite::{Connection, params};
use somnia_core::{
    BackgroundScheduler, CycleKind, CycleReport, MemoryConfig, MemoryError, StartOutcome, Tier,
};
use somnia_e2e_tests::harness::{TEST_DIMENSION, TestSystemManager};
use somnia_e2e_tests::mocks::{ScriptedDevice, TestDataFactory};

#[tokio::test]
async fn test_active_tiers_survive_restart() {
    let mut harness = TestSystemManager::new_temp();
    let chat = harness.process("brew #coffee at home").await;
    let again = harness.process("brew #coffee at home").await;
    let fact = harness.process_kind("a #kettle is a small boiler", "fact").await;
    let howto = harness.process("how to descale the #kettle step 1 add vinegar").await;
    assert_eq!(howto.tier, Tier::Procedural);

    let before = harness.system.store().find(&chat.memory_id).unwrap();
    let retrievals = before.retrieval_count();
    assert!(retrievals > 0);

    let restored = harness.restart();

    assert_eq!(restored, 4);
    assert_eq!(harness.tier_len(Tier::Working), 2);
    assert_eq!(harness.tier_len(Tier::Semantic), 1);
    assert_eq!(harness.tier_len(Tier::Procedural), 1);

    let after = harness.system.store().find(&chat.memory_id).unwrap();
    assert_eq!(after.content, before.content);
    assert_eq!(after.timestamp, before.timestamp);
    assert_eq!(after.retrieval_count(), retrievals);
    assert_eq!(after.embedding.len(), TEST_DIMENSION);

    let inherited = harness.system.store().find(&again.memory_id).unwrap();
    assert_eq!(inherited.associations(), vec!["coffee".to_string()]);
    assert_eq!(harness.system.store().find(&fact.memory_id).unwrap().tier, Tier::Semantic);

    // Restored memories take part in retrieval straight away
    harness.process("brew #coffee at home").await;
    let prompt = harness.generator.prompts().pop().unwrap();
    assert!(prompt.contains("Relevant Knowledge:"));
}

#[tokio::test]
async fn test_demoted_memories_survive_restart_before_the_seal() {
    let config = MemoryConfig {
        active_memory_size: 2,
        ..TestSystemManager::test_config()
    };
    let mut harness = TestSystemManager::with_config(config);
    for text in ["alpha one", "bravo two", "charlie three"] {
        harness.process(text).await;
    }
    assert_eq!(harness.system.archive().pending_len(), 1);

    let restored = harness.restart();
    assert_eq!(harness.system.archive().pending_len(), 1);
    assert_eq!(harness.system.stats().experiences_today, 3);

    let report = harness.system.run_nightly_integration(&|| true).await;
    assert!(report.archive_entry.is_some());
    let entries = harness
        .system
        .archive()
        .entries_for(Local::now().date_naive())
        .unwrap();
    assert_eq!(restored + entries[0].archived_memories.len(), 3);
    assert_eq!(entries[0].experiences.len(), 3);

    // Nothing sealed comes back a second time
    harness.restart();
    assert_eq!(harness.system.archive().pending_len(), 0);
    assert_eq!(harness.system.stats().experiences_today, 0);
    assert_eq!(harness.demoted_memory_count(), 1);
}

#[tokio::test]
async fn test_crash_after_seal_does_not_archive_twice() {
    let config = MemoryConfig {
        active_memory_size: 2,
        ..TestSystemManager::test_config()
    };
    let mut harness = TestSystemManager::with_config(config);
    for text in ["alpha one", "bravo two", "charlie three"] {
        harness.process(text).await;
    }
    harness.system.persist_snapshots().unwrap();

    // Seal straight through the archive, skipping the post-run checkpoint
    harness
        .system
        .archive()
        .seal(Local::now().date_naive(), Vec::new(), Vec::new(), Default::default())
        .unwrap();
    harness.reopen();
    harness.system.restore_snapshots().unwrap();

    assert_eq!(harness.system.archive().pending_len(), 0);
    assert_eq!(harness.system.stats().experiences_today, 3);
    assert_eq!(harness.demoted_memory_count(), 1);
}

#[tokio::test]
async fn test_knowledge_survives_restart() {
    let mut harness = TestSystemManager::new_temp();
    for _ in 0..3 {
        harness.process("water the #garden").await;
    }
    harness.system.run_nightly_integration(&|| true).await;
    let learned = harness.system.knowledge_entry("garden").unwrap();

    harness.restart();
    let restored = harness.system.knowledge_entry("garden").unwrap();
    assert_eq!(restored.frequency, learned.frequency);
    assert_eq!(restored.revision, learned.revision);
    assert_eq!(restored.trained_revision, learned.trained_revision);
    assert!(!restored.needs_training());
    assert_eq!(harness.system.stats().knowledge_entries, 1);
}

#[tokio::test]
async fn test_fresh_database_restores_nothing() {
    let mut harness = TestSystemManager::new_temp();
    harness.reopen();

    assert_eq!(harness.system.restore_snapshots().unwrap(), 0);
    assert_eq!(harness.active_memory_count(), 0);
}

#[tokio::test]
async fn test_archive_and_nightly_history_survive_reopen() {
    let mut harness = TestSystemManager::new_temp();
    for text in TestDataFactory::chatter(30) {
        harness.process(&text).await;
    }
    let report = harness.system.run_nightly_integration(&|| true).await;
    let entry_id = report.archive_entry.unwrap();

    harness.reopen();

    assert_eq!(harness.entry_count(), 1);
    let entries = harness
        .system
        .archive()
        .entries_for(Local::now().date_naive())
        .unwrap();
    assert_eq!(entries[0].id, entry_id);
    assert_eq!(entries[0].archived_memories.len(), 10);
    assert_eq!(entries[0].experiences.len(), 30);

    let run = harness.system.last_nightly_run().unwrap();
    assert!(run.completed);

    // Nightly already ran today, so the scheduler goes straight to light learning
    let scheduler = BackgroundScheduler::new(Arc::clone(&harness.system), Arc::new(ScriptedDevice::asleep()));
    assert_eq!(scheduler.last_nightly(), Some(Local::now().date_naive()));
    assert!(matches!(
        scheduler.tick().await,
        StartOutcome::Completed(CycleReport::Light(_))
    ));
    assert!(matches!(
        scheduler.run_cycle(CycleKind::Nightly).await,
        StartOutcome::Completed(CycleReport::Nightly(_))
    ));
    assert_eq!(harness.entry_count(), 2);
}

#[tokio::test]
async fn test_unknown_snapshot_tag_is_rejected_without_side_effects() {
    let harness = TestSystemManager::new_temp();
    harness.process("first thought").await;
    harness.system.persist_snapshots().unwrap();
    harness.process("second thought").await;

    let conn = Connection::open(harness.path()).unwrap();
    conn.execute(
        "INSERT INTO tier_snapshots (tier, saved_at, payload) VALUES (?1, ?2, ?3)",
        params!["dream", Utc::now().to_rfc3339(), "[]"],
    )
    .unwrap();

    let err = harness.system.restore_snapshots().unwrap_err();
    assert!(matches!(err, MemoryError::InvalidTier(ref tag) if tag == "dream"));
    // The in-flight second thought was not rolled back to the snapshot
    assert_eq!(harness.tier_len(Tier::Working), 2);
}

#[tokio::test]
async fn test_snapshot_with_wrong_dimension_is_rejected() {
    let harness = TestSystemManager::new_temp();
    let record = TestDataFactory::record(Tier::Episodic, "from an older model", TEST_DIMENSION / 2);
    let conn = Connection::open(harness.path()).unwrap();
    conn.execute(
        "INSERT INTO tier_snapshots (tier, saved_at, payload) VALUES (?1, ?2, ?3)",
        params!["episodic", Utc::now().to_rfc3339(), serde_json::to_string(&[record]).unwrap()],
    )
    .unwrap();

    let err = harness.system.restore_snapshots().unwrap_err();
    assert!(matches!(
        err,
        MemoryError::DimensionMismatch { expected, actual } if expected == TEST_DIMENSION && actual == TEST_DIMENSION / 2
    ));
    assert_eq!(harness.active_memory_count(), 0);
}
