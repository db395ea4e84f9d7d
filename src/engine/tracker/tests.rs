use super::*;
use crate::engine::network::tests::loop_definition;
use chrono::NaiveDate;

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 1)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn network() -> Arc<TrackNetwork> {
    Arc::new(TrackNetwork::load(&loop_definition()).unwrap())
}

/// MAIN 8:00-8:10（最快 5 分钟），B_P1 8:10-8:15（最快 15 秒）
fn express(id: &str) -> Train {
    Train::new(
        id,
        id,
        TrainClass::Express,
        120.0,
        vec![
            ItineraryLeg::new("MAIN", at(8, 0, 0), at(8, 10, 0)),
            ItineraryLeg::new("B_P1", at(8, 10, 0), at(8, 15, 0)),
        ],
    )
}

fn tracker_with(trains: Vec<Train>, clock: NaiveDateTime) -> TrainTracker {
    let mut tracker = TrainTracker::new(network(), clock);
    for train in trains {
        tracker.register_train(train).unwrap();
    }
    tracker
}

// ==========================================
// 推演
// ==========================================

#[test]
fn test_projection_runs_to_schedule() {
    let tracker = tracker_with(vec![express("E1")], at(7, 50, 0));
    let projection = tracker.projection("E1").unwrap();

    assert_eq!(projection.legs.len(), 2);
    assert_eq!(projection.legs[0].entry, at(8, 0, 0));
    assert_eq!(projection.legs[0].exit, at(8, 10, 0));
    assert_eq!(projection.legs[0].schedule_wait, Duration::minutes(5));
    assert_eq!(projection.legs[1].exit, at(8, 15, 0));
    assert_eq!(projection.final_delay(), Duration::zero());
}

#[test]
fn test_advance_agrees_with_projection() {
    let mut tracker = tracker_with(vec![express("E1")], at(7, 50, 0));
    let before = tracker.projection("E1").unwrap();

    for _ in 0..15 {
        tracker.advance(Duration::minutes(1)).unwrap();
    }
    assert_eq!(tracker.clock(), at(8, 5, 0));

    let train = tracker.train("E1").unwrap();
    match train.position {
        TrainPosition::InSection {
            leg_index,
            progress_km,
        } => {
            assert_eq!(leg_index, 0);
            assert!((progress_km - 5.0).abs() < 0.01, "progress={}", progress_km);
        }
        ref other => panic!("unexpected position: {:?}", other),
    }

    let after = tracker.projection("E1").unwrap();
    assert_eq!(after.legs[0].exit, before.legs[0].exit);
    assert_eq!(after.final_exit(), before.final_exit());
}

#[test]
fn test_slow_train_records_delay_at_boundary() {
    let freight = Train::new(
        "F1",
        "F1",
        TrainClass::Freight,
        60.0,
        vec![
            ItineraryLeg::new("MAIN", at(8, 0, 0), at(8, 5, 0)),
            ItineraryLeg::new("B_P2", at(8, 5, 0), at(8, 8, 0)),
        ],
    );
    let mut tracker = tracker_with(vec![freight], at(8, 0, 0));
    let report = tracker.advance(Duration::seconds(610)).unwrap();

    let train = tracker.train("F1").unwrap();
    assert_eq!(train.current_section().map(String::as_str), Some("B_P2"));
    assert_eq!(train.last_boundary_delay, Duration::minutes(5));
    assert!((train.reported_delay_minutes() - 5.0).abs() < 1e-9);
    assert!(report
        .crossings
        .iter()
        .any(|c| c.exited.as_deref() == Some("MAIN") && c.at == at(8, 10, 0)));
}

#[test]
fn test_completed_train_leaves_tracker() {
    let mut tracker = tracker_with(vec![express("E1")], at(7, 59, 0));
    let report = tracker.advance(Duration::minutes(30)).unwrap();

    assert_eq!(report.completed, vec!["E1".to_string()]);
    assert!(tracker.train("E1").is_none());
    assert_eq!(tracker.completed_count(), 1);
    let last = report.crossings.last().unwrap();
    assert_eq!(last.exited.as_deref(), Some("B_P1"));
    assert_eq!(last.entered, None);
    assert_eq!(last.delay, Duration::zero());
}

#[test]
fn test_negative_step_rejected() {
    let mut tracker = tracker_with(vec![express("E1")], at(7, 59, 0));
    assert!(tracker.advance(Duration::seconds(-1)).is_err());
}

// ==========================================
// 扣车
// ==========================================

#[test]
fn test_hold_absorbed_by_slack() {
    let mut tracker = tracker_with(vec![express("E1")], at(7, 50, 0));
    assert_eq!(
        tracker.slack_after("E1", "B_P1").unwrap(),
        Duration::seconds(285)
    );
    assert_eq!(
        tracker.slack_after("E1", "MAIN").unwrap(),
        Duration::seconds(585)
    );

    tracker
        .apply_action("E1", &TrainAction::hold("E1", Some("B_P1"), Duration::minutes(3)).kind)
        .unwrap();
    let projection = tracker.projection("E1").unwrap();
    assert_eq!(projection.legs[1].entry, at(8, 13, 0));
    assert_eq!(projection.final_exit(), Some(at(8, 15, 0)));

    tracker
        .apply_action("E1", &TrainAction::hold("E1", Some("B_P1"), Duration::minutes(3)).kind)
        .unwrap();
    let projection = tracker.projection("E1").unwrap();
    assert_eq!(projection.final_exit(), Some(at(8, 16, 15)));
    assert_eq!(projection.final_delay(), Duration::seconds(75));
}

#[test]
fn test_departure_hold_consumed_after_schedule() {
    let mut tracker = tracker_with(vec![express("E1")], at(7, 55, 0));
    tracker
        .apply_action("E1", &TrainAction::hold("E1", None, Duration::minutes(4)).kind)
        .unwrap();
    assert_eq!(
        tracker.projection("E1").unwrap().legs[0].entry,
        at(8, 4, 0)
    );

    tracker.advance(Duration::minutes(7)).unwrap();
    let train = tracker.train("E1").unwrap();
    assert!(!train.is_started());
    assert_eq!(train.departure_hold, Duration::minutes(2));

    tracker.advance(Duration::minutes(3)).unwrap();
    let train = tracker.train("E1").unwrap();
    assert_eq!(train.itinerary[0].actual_entry, Some(at(8, 4, 0)));
}

#[test]
fn test_hold_before_occupied_section_rejected() {
    let mut tracker = tracker_with(vec![express("E1")], at(8, 0, 0));
    tracker.advance(Duration::minutes(1)).unwrap();

    let err = tracker
        .apply_action("E1", &TrainAction::hold("E1", Some("MAIN"), Duration::minutes(1)).kind)
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidAction { .. }));

    let err = tracker
        .apply_action("E1", &TrainAction::hold("E1", Some("L1"), Duration::minutes(1)).kind)
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidAction { .. }));
}

#[test]
fn test_unknown_train_action() {
    let mut tracker = tracker_with(vec![express("E1")], at(8, 0, 0));
    let err = tracker
        .apply_action("NOPE", &TrainAction::hold("NOPE", None, Duration::minutes(1)).kind)
        .unwrap_err();
    assert_eq!(err, DispatchError::UnknownTrain("NOPE".to_string()));
}

// ==========================================
// 提前 / 次序
// ==========================================

#[test]
fn test_expedite_within_schedule_buffer() {
    let mut tracker = tracker_with(vec![express("E1")], at(7, 50, 0));
    assert_eq!(
        tracker.expedite_capacity("E1", "MAIN").unwrap(),
        Duration::minutes(5)
    );

    let err = tracker
        .apply_action("E1", &TrainAction::expedite("E1", "MAIN", Duration::minutes(6)).kind)
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidAction { .. }));

    tracker
        .apply_action("E1", &TrainAction::expedite("E1", "MAIN", Duration::minutes(3)).kind)
        .unwrap();
    let projection = tracker.projection("E1").unwrap();
    assert_eq!(projection.legs[0].exit, at(8, 7, 0));
    assert_eq!(projection.final_exit(), Some(at(8, 15, 0)));
    assert_eq!(
        tracker.expedite_capacity("E1", "MAIN").unwrap(),
        Duration::minutes(2)
    );
}

#[test]
fn test_resequence_overrides_priority() {
    let mut tracker = tracker_with(vec![express("E1")], at(7, 50, 0));
    tracker
        .apply_action("E1", &TrainAction::resequence("E1", "B_P1", 9).kind)
        .unwrap();
    let train = tracker.train("E1").unwrap();
    assert_eq!(train.effective_priority("B_P1"), 9);
    assert_eq!(train.effective_priority("MAIN"), 3);
}

// ==========================================
// 改路
// ==========================================

#[test]
fn test_reroute_and_inverse_restore_timetable() {
    let mut tracker = tracker_with(vec![express("E1")], at(7, 50, 0));
    let original = tracker.train("E1").unwrap().itinerary.clone();
    let original_delay = tracker.projection("E1").unwrap().final_delay();

    let reroute = TrainAction::reroute(
        "E1",
        vec!["MAIN".to_string()],
        vec!["L1".to_string(), "L2".to_string()],
    );
    tracker.apply_action("E1", &reroute.kind).unwrap();

    let train = tracker.train("E1").unwrap();
    let sections: Vec<&str> = train.itinerary.iter().map(|l| l.section_id.as_str()).collect();
    assert_eq!(sections, vec!["L1", "L2", "B_P1"]);
    assert_eq!(train.itinerary[0].scheduled_entry, at(8, 0, 0));
    assert_eq!(train.itinerary[0].scheduled_exit, at(8, 5, 0));
    assert_eq!(train.itinerary[1].scheduled_exit, at(8, 10, 0));

    let inverse = reroute.inverse_reroute().unwrap();
    tracker.apply_action("E1", &inverse.kind).unwrap();

    let train = tracker.train("E1").unwrap();
    assert_eq!(train.itinerary, original);
    assert_eq!(
        tracker.projection("E1").unwrap().final_delay(),
        original_delay
    );
}

#[test]
fn test_reroute_to_shorter_non_timetable_path_rejected() {
    let detour = Train::new(
        "P1",
        "P1",
        TrainClass::Passenger,
        120.0,
        vec![
            ItineraryLeg::new("L1", at(8, 0, 0), at(8, 5, 0)),
            ItineraryLeg::new("L2", at(8, 5, 0), at(8, 10, 0)),
        ],
    );
    let mut tracker = tracker_with(vec![detour], at(7, 50, 0));
    let err = tracker
        .apply_action(
            "P1",
            &ActionKind::Reroute {
                replace: vec!["L1".to_string(), "L2".to_string()],
                via: vec!["MAIN".to_string()],
            },
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidAction { .. }));
}

#[test]
fn test_reroute_endpoint_mismatch_rejected() {
    let mut tracker = tracker_with(vec![express("E1")], at(7, 50, 0));
    let err = tracker
        .apply_action(
            "E1",
            &ActionKind::Reroute {
                replace: vec!["MAIN".to_string()],
                via: vec!["L1".to_string()],
            },
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidAction { .. }));
}

// ==========================================
// 原子性 / 登记
// ==========================================

#[test]
fn test_apply_actions_is_atomic() {
    let mut tracker = tracker_with(vec![express("E1")], at(7, 50, 0));
    let before = tracker.train("E1").unwrap().clone();
    let revision = tracker.revision();

    let result = tracker.apply_actions(&[
        TrainAction::hold("E1", Some("B_P1"), Duration::minutes(2)),
        TrainAction::expedite("E1", "MAIN", Duration::minutes(30)),
    ]);
    assert!(result.is_err());
    assert_eq!(tracker.train("E1").unwrap(), &before);
    assert_eq!(tracker.revision(), revision);
}

#[test]
fn test_what_if_leaves_tracker_untouched() {
    let tracker = tracker_with(vec![express("E1")], at(7, 50, 0));
    let snapshot = tracker
        .what_if(&[TrainAction::hold("E1", None, Duration::minutes(20))])
        .unwrap();

    assert_eq!(
        snapshot.projection("E1").unwrap().legs[0].entry,
        at(8, 20, 0)
    );
    assert_eq!(
        tracker.projection("E1").unwrap().legs[0].entry,
        at(8, 0, 0)
    );
}

#[test]
fn test_register_rejects_broken_itinerary() {
    let mut tracker = TrainTracker::new(network(), at(7, 50, 0));
    let broken = Train::new(
        "X1",
        "X1",
        TrainClass::Passenger,
        100.0,
        vec![
            ItineraryLeg::new("L2", at(8, 0, 0), at(8, 5, 0)),
            ItineraryLeg::new("L1", at(8, 5, 0), at(8, 10, 0)),
        ],
    );
    assert!(matches!(
        tracker.register_train(broken),
        Err(DispatchError::InvalidAction { .. })
    ));

    let unknown = Train::new(
        "X2",
        "X2",
        TrainClass::Passenger,
        100.0,
        vec![ItineraryLeg::new("NOPE", at(8, 0, 0), at(8, 5, 0))],
    );
    assert!(tracker.register_train(unknown).is_err());

    tracker.register_train(express("E1")).unwrap();
    assert!(tracker.register_train(express("E1")).is_err());
}

#[test]
fn test_remove_running_train_rejected() {
    let mut tracker = tracker_with(vec![express("E1"), express("E2")], at(8, 0, 0));
    tracker.advance(Duration::minutes(1)).unwrap();
    assert!(tracker.remove_train("E1").is_err());

    let mut idle = tracker_with(vec![express("E3")], at(7, 0, 0));
    assert_eq!(idle.remove_train("E3").unwrap().id, "E3");
    assert_eq!(idle.active_count(), 0);
}

#[test]
fn test_state_round_trip() {
    let mut tracker = tracker_with(vec![express("E1")], at(8, 0, 0));
    tracker.advance(Duration::minutes(3)).unwrap();
    let state = tracker.state();

    let restored = TrainTracker::from_state(network(), state.clone()).unwrap();
    assert_eq!(restored.clock(), tracker.clock());
    assert_eq!(restored.revision(), tracker.revision());
    assert_eq!(restored.state(), state);
}
