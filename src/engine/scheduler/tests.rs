use super::*;
use crate::domain::train::{ActionKind, ItineraryLeg};
use crate::domain::types::{ConflictStatus, ResolutionStrategy, TrainClass};
use crate::engine::detector::find_contentions;
use crate::engine::events::DispatchEventPublisher;
use crate::engine::network::tests::loop_definition;
use crate::engine::network::TrackNetwork;
use chrono::NaiveDate;
use std::error::Error;
use std::sync::Mutex;

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 1)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingPublisher {
    fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.as_str()).collect()
    }
}

impl DispatchEventPublisher for RecordingPublisher {
    fn publish(&self, event: DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

fn single_leg(id: &str, class: TrainClass, entry: NaiveDateTime, exit: NaiveDateTime) -> Train {
    Train::new(id, id, class, 200.0, vec![ItineraryLeg::new("MAIN", entry, exit)])
}

fn scheduler_for(trains: Vec<Train>, config: DispatchConfig) -> (DispatchScheduler, Arc<RecordingPublisher>) {
    let network = Arc::new(TrackNetwork::load(&loop_definition()).unwrap());
    let mut tracker = TrainTracker::new(network, at(8, 0, 0));
    for train in trains {
        tracker.register_train(train).unwrap();
    }

    let recorder = Arc::new(RecordingPublisher::default());
    let publisher = OptionalEventPublisher::with_publisher(recorder.clone());
    (DispatchScheduler::new(tracker, &config, publisher), recorder)
}

/// E1(特快) 8:02-8:10 与 F1(货车) 8:07-8:15 在 MAIN 上重叠 3 分钟
fn scheduler_with(config: DispatchConfig) -> (DispatchScheduler, Arc<RecordingPublisher>) {
    scheduler_for(
        vec![
            single_leg("E1", TrainClass::Express, at(8, 2, 0), at(8, 10, 0)),
            single_leg("F1", TrainClass::Freight, at(8, 7, 0), at(8, 15, 0)),
        ],
        config,
    )
}

/// 瞭望窗口内的全部超容量重叠（响应阈值放宽到 H）
fn contentions_within_horizon(scheduler: &DispatchScheduler) -> Vec<crate::domain::conflict::Contention> {
    let detection = DispatchConfig::default().detection_params();
    let params = DetectionParams {
        reaction_window: detection.horizon,
        ..detection
    };
    find_contentions(&scheduler.snapshot().unwrap(), &params)
}

fn hold_of(record: &ResolutionRecord) -> Duration {
    match &record.actions[0].kind {
        ActionKind::Hold { duration, .. } => *duration,
        other => panic!("unexpected action: {:?}", other),
    }
}

fn scheduler() -> (DispatchScheduler, Arc<RecordingPublisher>) {
    scheduler_with(DispatchConfig::default())
}

#[test]
fn test_tick_detects_and_recommends() {
    let (scheduler, recorder) = scheduler();
    let report = scheduler.tick().unwrap();

    assert_eq!(report.tick, 1);
    assert_eq!(report.clock, Some(at(8, 0, 5)));
    assert_eq!(report.scan.detected, vec!["CF-000001".to_string()]);
    assert_eq!(report.recommended, 1);
    assert!(recorder.names().contains(&"ConflictDetected"));

    let options = scheduler.recommendations("CF-000001").unwrap();
    assert_eq!(options[0].strategy, ResolutionStrategy::PriorityHold);
    assert_eq!(options[0].actions[0].train_id, "F1");
}

#[test]
fn test_accept_twice_applies_once() {
    let (scheduler, recorder) = scheduler();
    scheduler.tick().unwrap();
    let option_id = scheduler.recommendations("CF-000001").unwrap()[0].option_id.clone();
    let revision_before = scheduler.snapshot().unwrap().revision();

    let record = scheduler.accept("CF-000001", &option_id, "tester").unwrap();
    assert_eq!(record.option_id, option_id);
    assert_eq!(record.section_id, "MAIN");
    assert_eq!(record.tick, 1);

    let second = scheduler.accept("CF-000001", &option_id, "tester");
    assert_eq!(
        second.unwrap_err(),
        DispatchError::AlreadyResolved("CF-000001".to_string())
    );

    // 只执行了一次动作
    let snapshot = scheduler.snapshot().unwrap();
    assert_eq!(snapshot.revision(), revision_before + 1);
    assert!(snapshot.train("F1").unwrap().departure_hold >= Duration::minutes(5));
    let resolved = recorder
        .names()
        .iter()
        .filter(|n| **n == "ConflictResolved")
        .count();
    assert_eq!(resolved, 1);

    // 瞭望窗口内 MAIN 不再超容量，后续扫描也不再出现该冲突
    assert!(contentions_within_horizon(&scheduler).is_empty());
    let report = scheduler.tick().unwrap();
    assert!(report.scan.detected.is_empty());
}

#[test]
fn test_chained_accepts_keep_section_within_capacity() {
    // MAIN 上三车接续：E1 8:01-8:07，P1 8:05-8:11，F1 8:09-8:15
    let (scheduler, _) = scheduler_for(
        vec![
            single_leg("E1", TrainClass::Express, at(8, 1, 0), at(8, 7, 0)),
            single_leg("P1", TrainClass::Passenger, at(8, 5, 0), at(8, 11, 0)),
            single_leg("F1", TrainClass::Freight, at(8, 9, 0), at(8, 15, 0)),
        ],
        DispatchConfig::default(),
    );
    let report = scheduler.tick().unwrap();
    assert_eq!(
        report.scan.detected,
        vec!["CF-000001".to_string(), "CF-000002".to_string()]
    );

    // P1 扣车 4 分钟让 E1，随后 8:09-8:14 占用 MAIN
    let first = scheduler.accept("CF-000001", "CF-000001-hold", "tester").unwrap();
    assert_eq!(first.actions[0].train_id, "P1");
    assert_eq!(hold_of(&first), Duration::minutes(4));

    // F1 的扣车按 P1 当前出清时刻 8:14 计算，而不是扫描时的 8:11
    let second = scheduler.accept("CF-000002", "CF-000002-hold", "tester").unwrap();
    assert_eq!(second.actions[0].train_id, "F1");
    assert_eq!(hold_of(&second), Duration::minutes(7));

    assert!(contentions_within_horizon(&scheduler).is_empty());
    let report = scheduler.tick().unwrap();
    assert!(report.scan.detected.is_empty());
}

#[test]
fn test_accept_rejects_option_changed_since_fetch() {
    let (scheduler, _) = scheduler();
    scheduler.tick().unwrap();
    let seen = scheduler.recommendations("CF-000001").unwrap();
    assert_eq!(seen[0].option_id, "CF-000001-hold");

    // 推演在方案获取后变化（F1 已被扣车 1 分钟），缓存未被清空
    {
        let mut state = scheduler.state.write().unwrap();
        state
            .tracker
            .apply_actions(&[TrainAction::hold("F1", Some("MAIN"), Duration::minutes(1))])
            .unwrap();
    }
    assert_eq!(
        scheduler.accept("CF-000001", "CF-000001-hold", "tester").unwrap_err(),
        DispatchError::StaleConflict("CF-000001".to_string())
    );
    let status = scheduler
        .read(|s| s.detector.registry().get("CF-000001").map(|r| r.status))
        .unwrap();
    assert_eq!(status, Some(ConflictStatus::Active));

    // 重新获取后按当前推演采纳：8:10 出清 + 2 分钟 - 8:08 进入
    let fresh = scheduler.recommendations("CF-000001").unwrap();
    let revision = scheduler.snapshot().unwrap().revision();
    assert!(fresh.iter().all(|o| o.computed_at_revision == revision));
    let record = scheduler.accept("CF-000001", "CF-000001-hold", "tester").unwrap();
    assert_eq!(hold_of(&record), Duration::minutes(4));
    assert!(contentions_within_horizon(&scheduler).is_empty());
}

#[test]
fn test_accept_rejects_unknown_ids() {
    let (scheduler, _) = scheduler();
    scheduler.tick().unwrap();

    assert_eq!(
        scheduler.accept("CF-999999", "x", "tester").unwrap_err(),
        DispatchError::UnknownConflict("CF-999999".to_string())
    );
    assert!(matches!(
        scheduler.accept("CF-000001", "CF-000001-nope", "tester"),
        Err(DispatchError::UnknownOption { .. })
    ));
    // 冲突仍为活动状态
    let status = scheduler
        .read(|s| s.detector.registry().get("CF-000001").map(|r| r.status))
        .unwrap();
    assert_eq!(status, Some(ConflictStatus::Active));
}

#[test]
fn test_conflict_expires_after_three_missed_scans() {
    let (scheduler, recorder) = scheduler();
    scheduler.tick().unwrap();
    scheduler.remove_train("F1").unwrap();

    for _ in 0..2 {
        let report = scheduler.tick().unwrap();
        assert!(report.scan.expired.is_empty());
    }
    let report = scheduler.tick().unwrap();
    assert_eq!(report.scan.expired, vec!["CF-000001".to_string()]);
    assert!(recorder.names().contains(&"ConflictExpired"));

    assert_eq!(
        scheduler.recommendations("CF-000001").unwrap_err(),
        DispatchError::StaleConflict("CF-000001".to_string())
    );
    let cached = scheduler.read(|s| s.recommendations.len()).unwrap();
    assert_eq!(cached, 0);
}

#[test]
fn test_failed_tick_leaves_state_unchanged() {
    let config = DispatchConfig {
        tick_interval_secs: -5,
        ..DispatchConfig::default()
    };
    let (scheduler, recorder) = scheduler_with(config);

    assert!(scheduler.tick().is_err());
    let (tick, clock, scans) = scheduler
        .read(|s| (s.tick, s.tracker.clock(), s.detector.registry().scans()))
        .unwrap();
    assert_eq!(tick, 0);
    assert_eq!(clock, at(8, 0, 0));
    assert_eq!(scans, 0);
    assert!(recorder.names().is_empty());
}

#[test]
fn test_train_events_follow_boundary_crossings() {
    let (scheduler, recorder) = scheduler();
    // 8:00 → 8:02:05，E1 发车进入 MAIN
    for _ in 0..25 {
        scheduler.tick().unwrap();
    }
    let events = recorder.events.lock().unwrap().clone();
    let entered = events.iter().find_map(|e| match e {
        DispatchEvent::TrainUpdated {
            train_id,
            section_id,
            delay_minutes,
            ..
        } if train_id == "E1" => Some((section_id.clone(), *delay_minutes)),
        _ => None,
    });
    assert_eq!(entered, Some((Some("MAIN".to_string()), 0.0)));
}

#[test]
fn test_snapshot_round_trip() {
    let (scheduler, _) = scheduler();
    scheduler.tick().unwrap();
    let payload = scheduler.export_snapshot().unwrap();
    let json = serde_json::to_string(&payload).unwrap();

    scheduler.tick().unwrap();
    scheduler.remove_train("F1").unwrap();

    let restored: DispatchSnapshotPayload = serde_json::from_str(&json).unwrap();
    scheduler.restore_snapshot(restored).unwrap();
    let (tick, trains, active) = scheduler
        .read(|s| {
            (
                s.tick,
                s.tracker.trains().count(),
                s.detector.registry().active_count(),
            )
        })
        .unwrap();
    assert_eq!(tick, 1);
    assert_eq!(trains, 2);
    assert_eq!(active, 1);
    // 方案缓存清空后按需重新生成
    assert!(!scheduler.recommendations("CF-000001").unwrap().is_empty());
}

#[test]
fn test_what_if_does_not_commit() {
    let (scheduler, _) = scheduler();
    let report = scheduler
        .what_if(&[TrainAction::hold("F1", Some("MAIN"), Duration::minutes(5))])
        .unwrap();
    assert_eq!(report.before.conflicts, 1);
    assert_eq!(report.after.conflicts, 0);
    let hold = scheduler
        .read(|s| s.tracker.train("F1").map(|t| t.departure_hold))
        .unwrap();
    assert_eq!(hold, Some(Duration::zero()));
}

#[tokio::test]
async fn test_run_ticks_until_shutdown() {
    let config = DispatchConfig {
        tick_interval_secs: 1,
        ..DispatchConfig::default()
    };
    let (scheduler, _) = scheduler_with(config);
    let scheduler = Arc::new(scheduler);

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            scheduler
                .run(async {
                    let _ = rx.await;
                })
                .await;
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    tx.send(()).unwrap();
    runner.await.unwrap();

    let (tick, cached) = scheduler
        .read(|s| (s.tick, s.recommendations.len()))
        .unwrap();
    assert_eq!(tick, 1);
    assert_eq!(cached, 1);
}
