// ==========================================
// 导入 → 装配 集成测试
// ==========================================


use section_dispatch::app::AppState;
use section_dispatch::importer::{parse_network_definition, TimetableLoader};
use test_helpers::*;

#[tokio::test]
async fn test_app_from_files() {
    let (_db, db_path) = create_test_db().unwrap();
    let network = write_temp(".json", NETWORK_JSON);
    let timetable = write_temp(".csv", TIMETABLE_CSV);

    let state = AppState::from_files(db_path, network.path(), timetable.path(), None)
        .await
        .unwrap();
    let trains = state.dispatch_api.get_active_trains().unwrap();
    assert_eq!(trains.len(), 3);

    // 起始时钟取最早图定进入时刻
    let clock = state.scheduler.snapshot().unwrap().clock();
    assert_eq!(clock.format("%H:%M:%S").to_string(), "08:00:00");
}

#[tokio::test]
async fn test_invalid_topology_aborts_startup() {
    let (_db, db_path) = create_test_db().unwrap();
    let broken = NETWORK_JSON.replace("\"capacity\": 2", "\"capacity\": 0");
    let definition = parse_network_definition(&broken).unwrap();
    let trains = TimetableLoader::load_reader(TIMETABLE_CSV.as_bytes()).unwrap();

    let result = AppState::new(db_path, &definition, trains, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_invalid_train_is_skipped() {
    let (_db, db_path) = create_test_db().unwrap();
    let definition = parse_network_definition(NETWORK_JSON).unwrap();
    // X1 的两段不相接（MAIN 终点 B，L1 起点 A）
    let csv = format!(
        "{}{}",
        TIMETABLE_CSV,
        "X1,X1,Freight,80,1,MAIN,2026-03-01 09:00:00,2026-03-01 09:10:00\n\
         X1,X1,Freight,80,2,L1,2026-03-01 09:10:00,2026-03-01 09:20:00\n"
    );
    let trains = TimetableLoader::load_reader(csv.as_bytes()).unwrap();
    assert_eq!(trains.len(), 4);

    let state = AppState::new(db_path, &definition, trains, None).await.unwrap();
    assert_eq!(state.dispatch_api.get_active_trains().unwrap().len(), 3);
}

#[tokio::test]
async fn test_config_overrides_apply_at_startup() {
    let (_db, db_path) = create_test_db().unwrap();
    {
        let manager = section_dispatch::config::ConfigManager::new(&db_path).unwrap();
        manager
            .set_config(section_dispatch::config::config_keys::REACTION_THRESHOLD_MINUTES, "5")
            .unwrap();
    }
    let definition = parse_network_definition(NETWORK_JSON).unwrap();
    let trains = TimetableLoader::load_reader(TIMETABLE_CSV.as_bytes()).unwrap();
    let state = AppState::new(db_path, &definition, trains, None).await.unwrap();
    assert_eq!(state.config.reaction_threshold_secs, 300);

    // R=5 分钟：8:00:05 时距重叠开始 (8:07) 尚有约 7 分钟，不判定冲突
    state.scheduler.tick().unwrap();
    assert!(state.dispatch_api.get_active_conflicts().unwrap().is_empty());
}
