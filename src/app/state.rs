// ==========================================
// 铁路区段调度系统 - 应用状态
// ==========================================
// 职责: 装配共享资源（数据库、配置、线路、调度器、API 实例）
// ==========================================

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::NaiveDateTime;

use crate::api::DispatchApi;
use crate::config::{ConfigManager, DispatchConfig, DispatchConfigReader};
use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::network::NetworkDefinition;
use crate::domain::train::Train;
use crate::engine::events::{BroadcastEventPublisher, OptionalEventPublisher};
use crate::engine::network::TrackNetwork;
use crate::engine::scheduler::DispatchScheduler;
use crate::engine::tracker::TrainTracker;
use crate::importer::{load_network_definition, TimetableLoader};
use crate::repository::{ResolutionLogRepository, SnapshotRepository};

/// 应用状态
///
/// 包含调度器、API 实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 调度参数（启动时从 config_kv 读取）
    pub config: DispatchConfig,

    /// 调度主循环
    pub scheduler: Arc<DispatchScheduler>,

    /// 调度 API
    pub dispatch_api: Arc<DispatchApi>,

    /// 事件广播
    pub broadcaster: Arc<BroadcastEventPublisher>,

    pub config_manager: Arc<ConfigManager>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    /// - definition: 线路定义（拓扑无效时启动失败）
    /// - trains: 初始运行图；单列车校验失败只告警跳过
    /// - start_clock: 仿真起始时刻，缺省取运行图最早图定进入时刻
    pub async fn new(
        db_path: String,
        definition: &NetworkDefinition,
        trains: Vec<Train>,
        start_clock: Option<NaiveDateTime>,
    ) -> anyhow::Result<Self> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .with_context(|| format!("无法打开数据库: {}", db_path))?;
        ensure_schema(&conn).context("数据库建表失败")?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 配置
        // ==========================================
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| anyhow::anyhow!("配置管理器初始化失败: {}", e))?,
        );
        let config = config_manager
            .load_dispatch_config()
            .await
            .map_err(|e| anyhow::anyhow!("调度参数读取失败: {}", e))?;
        tracing::info!("调度参数: {:?}", config);

        // ==========================================
        // 线路与列车
        // ==========================================
        let network = Arc::new(TrackNetwork::load(definition)?);
        tracing::info!(
            "线路加载完成: nodes={}, sections={}",
            network.node_count(),
            network.section_count()
        );

        let clock = start_clock
            .or_else(|| {
                trains
                    .iter()
                    .filter_map(|t| t.itinerary.first().map(|leg| leg.scheduled_entry))
                    .min()
            })
            .unwrap_or_else(|| chrono::Local::now().naive_local());
        let mut tracker = TrainTracker::new(network, clock);
        let total = trains.len();
        let mut skipped = 0;
        for train in trains {
            let train_id = train.id.clone();
            if let Err(e) = tracker.register_train(train) {
                tracing::warn!("列车登记失败，已跳过: train_id={}, error={}", train_id, e);
                skipped += 1;
            }
        }
        tracing::info!(
            "运行图登记完成: clock={}, trains={}, skipped={}",
            clock,
            total - skipped,
            skipped
        );

        // ==========================================
        // 调度器与 API
        // ==========================================
        let broadcaster = Arc::new(BroadcastEventPublisher::new());
        let publisher = OptionalEventPublisher::with_publisher(broadcaster.clone());
        let scheduler = Arc::new(DispatchScheduler::new(tracker, &config, publisher));

        let dispatch_api = Arc::new(DispatchApi::new(
            scheduler.clone(),
            broadcaster.clone(),
            Arc::new(ResolutionLogRepository::new(conn.clone())),
            Arc::new(SnapshotRepository::new(conn)),
            config_manager.clone(),
            config,
        ));

        Ok(Self {
            db_path,
            config,
            scheduler,
            dispatch_api,
            broadcaster,
            config_manager,
        })
    }

    /// 从线路 JSON 与运行图 CSV 文件装配
    pub async fn from_files(
        db_path: String,
        network_path: &Path,
        timetable_path: &Path,
        start_clock: Option<NaiveDateTime>,
    ) -> anyhow::Result<Self> {
        let definition = load_network_definition(network_path)
            .with_context(|| format!("线路定义读取失败: {}", network_path.display()))?;
        let trains = TimetableLoader::load_path(timetable_path)
            .with_context(|| format!("运行图读取失败: {}", timetable_path.display()))?;
        Self::new(db_path, &definition, trains, start_clock).await
    }
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 SECTION_DISPATCH_DB_PATH → 用户数据目录 → 当前目录
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("SECTION_DISPATCH_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./section_dispatch.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("section-dispatch");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("section_dispatch.db");
        }
    }
    path.to_string_lossy().to_string()
}
