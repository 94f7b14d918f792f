//! Journey: foreground inputs flowing through the tiers into the archive
//!
//! Active tiers stay within their bounds, and nothing evicted is ever lost:
//! it is either pending for the next seal or already in a sealed entry.

use std::sync::Arc;

use chrono::Local;
use somnia_core::{ContextItem, Input, MemoryError, Tier};
use somnia_e2e_tests::harness::TestSystemManager;
use somnia_e2e_tests::mocks::TestDataFactory;

#[tokio::test]
async fn test_tiers_stay_bounded_under_load() {
    let harness = TestSystemManager::new_temp();
    let capacity = harness.config().capacity_for(Tier::Working);

    let mut consolidations = 0;
    for text in TestDataFactory::chatter(100) {
        let outcome = harness.process(&text).await;
        assert_eq!(outcome.tier, Tier::Working);
        assert!(harness.tier_len(Tier::Working) <= capacity);
        if let Some(result) = outcome.consolidation {
            assert_eq!(result.after, capacity);
            assert_eq!(result.archived.len(), result.before - capacity);
            consolidations += 1;
        }
    }

    assert_eq!(consolidations, 100 - capacity);
    assert_eq!(harness.active_memory_count() + harness.demoted_memory_count(), 100);
}

#[tokio::test]
async fn test_nightly_seal_makes_every_demotion_durable() {
    let harness = TestSystemManager::new_temp();
    for text in TestDataFactory::chatter(60) {
        harness.process(&text).await;
    }
    let pending = harness.system.archive().pending_len();
    assert_eq!(pending, 40);
    assert_eq!(harness.entry_count(), 0);

    let report = harness.system.run_nightly_integration(&|| true).await;

    assert!(report.completed);
    assert_eq!(harness.entry_count(), 1);
    assert_eq!(harness.system.archive().pending_len(), 0);
    assert_eq!(harness.archived_memory_count(), pending);

    let entries = harness
        .system
        .archive()
        .entries_for(Local::now().date_naive())
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].experiences.len(), 60);
    assert_eq!(entries[0].daily_metrics.memories_archived, pending);
    assert_eq!(harness.system.stats().experiences_today, 0);
}

#[tokio::test]
async fn test_lowest_value_memory_is_the_one_demoted() {
    let mut config = TestSystemManager::test_config();
    config.active_memory_size = 3;
    // keep retrieval counts equal across the four memories
    config.retrieval.other_top_k = 0;
    let harness = TestSystemManager::with_config(config);

    let mut ids = Vec::new();
    for (text, importance) in [
        ("granite is a rock", 0.9),
        ("basalt is a rock", 0.1),
        ("marble is a rock", 0.5),
        ("slate is a rock", 0.7),
    ] {
        let outcome = harness
            .system
            .process_input(Input::text(text).with_kind("fact").with_importance(importance))
            .await
            .unwrap();
        ids.push(outcome.memory_id);
    }

    assert_eq!(harness.tier_len(Tier::Semantic), 3);
    let pending = harness.system.archive().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, ids[1]);
    for kept in [ids[0], ids[2], ids[3]] {
        assert!(harness.system.store().find(&kept).is_some());
    }
}

#[tokio::test]
async fn test_context_buffer_keeps_latest_items() {
    let mut config = TestSystemManager::test_config();
    config.max_context_items = 2;
    let harness = TestSystemManager::with_config(config);

    for name in ["A", "B", "C"] {
        harness.system.add_context(ContextItem::new(name, "ok"));
    }

    let inputs: Vec<String> = harness
        .system
        .recent_context(10)
        .into_iter()
        .map(|item| item.input)
        .collect();
    assert_eq!(inputs, vec!["B", "C"]);
}

#[tokio::test]
async fn test_collaborator_outage_stores_nothing() {
    let harness = TestSystemManager::new_temp();
    harness.process("warm up").await;

    harness.embedder.set_offline(true);
    let err = harness
        .system
        .process_input(Input::text("while the embedder is down"))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::EmbeddingUnavailable(_)));
    harness.embedder.set_offline(false);

    harness.generator.set_offline(true);
    let err = harness
        .system
        .process_input(Input::text("while the generator is down"))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::GenerationUnavailable(_)));
    harness.generator.set_offline(false);

    let stats = harness.system.stats();
    assert_eq!(harness.active_memory_count(), 1);
    assert_eq!(stats.context_items, 1);
    assert_eq!(stats.experiences_today, 1);

    // Recovered collaborators work again
    let outcome = harness.process("back online").await;
    assert_eq!(outcome.output, "Noted: back online");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inputs_lose_nothing() {
    let harness = TestSystemManager::new_temp();
    let system = Arc::clone(&harness.system);

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let system = Arc::clone(&system);
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                let text = format!("worker {} writes line {} of its log", worker, i);
                system.process_input(Input::text(text)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(harness.active_memory_count() + harness.demoted_memory_count(), 80);

    // A final pass settles any tier left over its bound by late arrivals
    for tier in Tier::ALL {
        harness.system.consolidate_tier(tier);
        assert!(harness.tier_len(tier) <= harness.config().capacity_for(tier));
    }
    assert_eq!(harness.active_memory_count() + harness.demoted_memory_count(), 80);
    assert_eq!(harness.system.stats().experiences_today, 80);
}
