//! Journey: the background scheduler deciding when to learn
//!
//! Device readings come from a scripted monitor; every gate read is one
//! `device_state` call, so tests can close the gate at an exact boundary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use somnia_core::{
    BackgroundScheduler, BatchOutcome, BatchSource, ContextItem, CycleKind, CycleReport,
    CycleState, DeviceState, GateViolation, LightCycleReport, StartOutcome,
};
use somnia_e2e_tests::harness::TestSystemManager;
use somnia_e2e_tests::mocks::ScriptedDevice;

fn fill_context(harness: &TestSystemManager, n: usize) {
    let base = Utc::now() - chrono::Duration::minutes(10);
    for i in 0..n {
        let mut item = ContextItem::new(format!("question {}", i), format!("answer {}", i));
        item.timestamp = base + chrono::Duration::seconds(i as i64);
        harness.system.add_context(item);
    }
}

fn daytime() -> DeviceState {
    DeviceState {
        local_hour: 14,
        ..ScriptedDevice::asleep_state()
    }
}

fn light_report(outcome: StartOutcome) -> LightCycleReport {
    match outcome {
        StartOutcome::Completed(CycleReport::Light(report)) => report,
        other => panic!("expected a light cycle, got {:?}", other),
    }
}

#[tokio::test]
async fn test_low_battery_blocks_learning() {
    let harness = TestSystemManager::new_temp();
    fill_context(&harness, 4);
    let device = Arc::new(ScriptedDevice::new(DeviceState {
        charging: false,
        battery_level: 0.2,
        idle: chrono::Duration::hours(3),
        free_memory_ratio: 0.9,
        local_hour: 14,
    }));
    let scheduler = BackgroundScheduler::new(Arc::clone(&harness.system), device);

    let StartOutcome::ConditionNotMet(violations) = scheduler.run_cycle(CycleKind::Light).await else {
        panic!("cycle started on low battery");
    };
    assert_eq!(violations.len(), 1);
    assert!(matches!(violations[0], GateViolation::BatteryLow { .. }));

    let StartOutcome::ConditionNotMet(violations) = scheduler.run_cycle(CycleKind::Nightly).await else {
        panic!("nightly started while unplugged");
    };
    assert!(violations.contains(&GateViolation::NotCharging));
    assert!(harness.trainer.calls().is_empty());
    assert_eq!(scheduler.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_light_cycle_learns_from_context() {
    let harness = TestSystemManager::new_temp();
    fill_context(&harness, 5);
    let scheduler = BackgroundScheduler::new(Arc::clone(&harness.system), Arc::new(ScriptedDevice::new(daytime())));

    let report = light_report(scheduler.run_cycle(CycleKind::Light).await);

    assert_eq!(report.items, 5);
    assert_eq!(report.batches.len(), 3);
    assert!(!report.interrupted);
    let calls = harness.trainer.calls();
    assert!(calls.iter().all(|c| c.source == BatchSource::Background));
    assert_eq!(calls.iter().map(|c| c.examples).collect::<Vec<_>>(), vec![2, 2, 1]);
}

#[tokio::test]
async fn test_gate_closing_stops_at_batch_boundary() {
    let harness = TestSystemManager::new_temp();
    fill_context(&harness, 8);
    let device = Arc::new(ScriptedDevice::new(daytime()));
    // start check and first boundary open, second boundary closed
    device.switch_after(2, ScriptedDevice::in_use());
    let scheduler = BackgroundScheduler::new(Arc::clone(&harness.system), device);

    let report = light_report(scheduler.run_cycle(CycleKind::Light).await);

    assert!(report.interrupted);
    assert_eq!(report.batches.len(), 2);
    assert_eq!(report.items, 4);
    // Completed batches stay applied
    assert!(report.batches.iter().all(|b| matches!(b.outcome, BatchOutcome::Applied { .. })));
    assert!(harness.trainer.rollbacks().is_empty());
    assert_eq!(scheduler.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_failed_light_batch_is_rolled_back_alone() {
    let harness = TestSystemManager::new_temp();
    fill_context(&harness, 6);
    harness.trainer.fail_batch(BatchSource::Background, 1);
    let scheduler = BackgroundScheduler::new(Arc::clone(&harness.system), Arc::new(ScriptedDevice::new(daytime())));

    let report = light_report(scheduler.run_cycle(CycleKind::Light).await);

    assert_eq!(report.batches.len(), 3);
    assert!(matches!(report.batches[1].outcome, BatchOutcome::RolledBack { .. }));
    assert!(matches!(report.batches[2].outcome, BatchOutcome::Applied { .. }));
    assert_eq!(harness.trainer.rollbacks(), vec![report.batches[1].id.clone()]);
}

#[tokio::test]
async fn test_only_one_cycle_runs_at_a_time() {
    let harness = TestSystemManager::new_temp();
    fill_context(&harness, 4);
    harness.trainer.set_delay(Duration::from_millis(200));
    let scheduler = Arc::new(BackgroundScheduler::new(
        Arc::clone(&harness.system),
        Arc::new(ScriptedDevice::new(daytime())),
    ));

    let running = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run_cycle(CycleKind::Light).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(scheduler.state(), CycleState::Running { kind: CycleKind::Light, .. }));
    assert_eq!(scheduler.run_cycle(CycleKind::Light).await, StartOutcome::AlreadyRunning);
    assert_eq!(scheduler.run_cycle(CycleKind::Nightly).await, StartOutcome::AlreadyRunning);

    let report = light_report(running.await.unwrap());
    assert_eq!(report.batches.len(), 2);
    assert_eq!(scheduler.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_stop_ends_cycle_without_undoing_work() {
    let harness = TestSystemManager::new_temp();
    fill_context(&harness, 10);
    harness.trainer.set_delay(Duration::from_millis(100));
    let scheduler = Arc::new(BackgroundScheduler::new(
        Arc::clone(&harness.system),
        Arc::new(ScriptedDevice::new(daytime())),
    ));

    let running = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run_cycle(CycleKind::Light).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.stop();

    let report = light_report(running.await.unwrap());
    assert!(report.interrupted);
    assert!(!report.batches.is_empty() && report.batches.len() < 5);
    assert!(report.batches.iter().all(|b| matches!(b.outcome, BatchOutcome::Applied { .. })));
    assert!(harness.trainer.rollbacks().is_empty());
}

#[tokio::test]
async fn test_tick_prefers_nightly_once_per_day() {
    let harness = TestSystemManager::new_temp();
    harness.process("evening walk by the #river").await;
    let scheduler = BackgroundScheduler::new(Arc::clone(&harness.system), Arc::new(ScriptedDevice::asleep()));

    let first = scheduler.tick().await;
    assert!(matches!(first, StartOutcome::Completed(CycleReport::Nightly(_))));
    assert_eq!(scheduler.last_nightly(), Some(Local::now().date_naive()));
    assert_eq!(harness.entry_count(), 1);

    let second = scheduler.tick().await;
    assert!(matches!(second, StartOutcome::Completed(CycleReport::Light(_))));
    assert_eq!(harness.entry_count(), 1);
}

#[tokio::test]
async fn test_tick_falls_back_to_light_outside_the_night_window() {
    let harness = TestSystemManager::new_temp();
    fill_context(&harness, 2);
    let scheduler = BackgroundScheduler::new(Arc::clone(&harness.system), Arc::new(ScriptedDevice::new(daytime())));

    let outcome = scheduler.tick().await;

    assert_eq!(light_report(outcome).items, 2);
    assert_eq!(scheduler.last_nightly(), None);
}

#[tokio::test]
async fn test_spawned_scheduler_learns_then_stops() {
    let harness = TestSystemManager::new_temp();
    fill_context(&harness, 3);
    let scheduler = Arc::new(BackgroundScheduler::new(
        Arc::clone(&harness.system),
        Arc::new(ScriptedDevice::new(daytime())),
    ));

    let handle = Arc::clone(&scheduler).spawn(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler loop did not stop")
        .unwrap();

    // the watermark keeps later ticks from retraining the same items
    let examples: usize = harness.trainer.calls().iter().map(|c| c.examples).sum();
    assert_eq!(examples, 3);
    assert_eq!(scheduler.state(), CycleState::Idle);
}
