use super::ResolutionLogRepository;
use crate::domain::resolution::{OptionImpact, ResolutionRecord};
use crate::domain::train::TrainAction;
use crate::domain::types::ResolutionStrategy;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

fn setup_test_db() -> Arc<Mutex<Connection>> {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::ensure_schema(&conn).unwrap();
    Arc::new(Mutex::new(conn))
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 1)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn make_record(record_id: &str, conflict_id: &str, accepted_at: NaiveDateTime, tick: u64) -> ResolutionRecord {
    ResolutionRecord {
        record_id: record_id.to_string(),
        conflict_id: conflict_id.to_string(),
        option_id: format!("{}-hold", conflict_id),
        strategy: ResolutionStrategy::PriorityHold,
        section_id: "MAIN".to_string(),
        actions: vec![TrainAction::hold("F1", Some("MAIN"), Duration::minutes(5))],
        impact: OptionImpact {
            delay_delta_minutes: 1.5,
            trains_affected: 1,
            resolves_conflict: true,
            ..OptionImpact::default()
        },
        explanation: "F1 扣车".to_string(),
        accepted_at,
        tick,
        actor: "dispatcher".to_string(),
    }
}

#[test]
fn test_insert_and_find_by_conflict() {
    let repo = ResolutionLogRepository::new(setup_test_db());
    let record = make_record("r1", "CF-000001", at(8, 0), 12);

    assert_eq!(repo.insert(&record).unwrap(), "r1");
    let found = repo.find_by_conflict("CF-000001").unwrap();
    assert_eq!(found, vec![record]);
    assert!(repo.find_by_conflict("CF-000009").unwrap().is_empty());
}

#[test]
fn test_duplicate_record_rejected() {
    let repo = ResolutionLogRepository::new(setup_test_db());
    let record = make_record("r1", "CF-000001", at(8, 0), 12);
    repo.insert(&record).unwrap();
    assert!(repo.insert(&record).is_err());
    assert_eq!(repo.count().unwrap(), 1);
}

#[test]
fn test_list_recent_orders_newest_first() {
    let repo = ResolutionLogRepository::new(setup_test_db());
    repo.insert(&make_record("r1", "CF-000001", at(8, 0), 1)).unwrap();
    repo.insert(&make_record("r2", "CF-000002", at(8, 5), 2)).unwrap();
    repo.insert(&make_record("r3", "CF-000003", at(8, 10), 3)).unwrap();

    let recent = repo.list_recent(2).unwrap();
    let ids: Vec<&str> = recent.iter().map(|r| r.record_id.as_str()).collect();
    assert_eq!(ids, vec!["r3", "r2"]);
    assert_eq!(repo.count().unwrap(), 3);
}
