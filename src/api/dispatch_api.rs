// ==========================================
// 铁路区段调度系统 - 调度 API
// ==========================================
// 职责: 对外查询/操作接口（列车、冲突、方案、指标、履历、快照）
// 架构: API 层 → DispatchScheduler（引擎）+ Repository（履历/快照）
// 红线: 读接口只取读锁；采纳走调度器写锁内的乐观复核
// ==========================================

use std::sync::Arc;

use futures::Stream;

use crate::api::dto::{ConflictView, ImplementationOutcome, OptionView, SnapshotInfo, TrainView};
use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, DispatchConfig};
use crate::domain::conflict::ConflictRecord;
use crate::domain::resolution::ResolutionRecord;
use crate::domain::train::{Train, TrainAction};
use crate::engine::detector::compare_by_urgency;
use crate::engine::events::{BroadcastEventPublisher, DispatchEvent};
use crate::engine::kpi::{self, ConflictPatterns, ConflictStatistics, NetworkStatus, WhatIfReport};
use crate::engine::scheduler::{DispatchScheduler, DispatchSnapshotPayload};
use crate::repository::resolution_log_repo::ResolutionLogRepository;
use crate::repository::snapshot_repo::{DispatchSnapshotEntity, SnapshotRepository};

/// 默认履历条数
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// ==========================================
// DispatchApi
// ==========================================
pub struct DispatchApi {
    scheduler: Arc<DispatchScheduler>,
    broadcaster: Arc<BroadcastEventPublisher>,
    resolution_log: Arc<ResolutionLogRepository>,
    snapshot_repo: Arc<SnapshotRepository>,
    config_manager: Arc<ConfigManager>,
    config: DispatchConfig,
}

impl DispatchApi {
    pub fn new(
        scheduler: Arc<DispatchScheduler>,
        broadcaster: Arc<BroadcastEventPublisher>,
        resolution_log: Arc<ResolutionLogRepository>,
        snapshot_repo: Arc<SnapshotRepository>,
        config_manager: Arc<ConfigManager>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            scheduler,
            broadcaster,
            resolution_log,
            snapshot_repo,
            config_manager,
            config,
        }
    }

    pub fn scheduler(&self) -> &Arc<DispatchScheduler> {
        &self.scheduler
    }

    // ==========================================
    // 列车 / 冲突 / 方案
    // ==========================================

    /// 查询在途及待发列车
    pub fn get_active_trains(&self) -> ApiResult<Vec<TrainView>> {
        let threshold = self.config.slight_delay_threshold_minutes();
        let views = self.scheduler.read(|state| {
            let tracker = &state.tracker;
            let projections = tracker.project_all();
            tracker
                .trains()
                .map(|train| {
                    let projection = projections.iter().find(|p| p.train_id == train.id);
                    TrainView::build(
                        train,
                        tracker.network(),
                        projection,
                        tracker.clock(),
                        threshold,
                    )
                })
                .collect()
        })?;
        Ok(views)
    }

    /// 查询活动冲突（严重等级降序，其次重叠开始最早）
    pub fn get_active_conflicts(&self) -> ApiResult<Vec<ConflictView>> {
        let mut records: Vec<ConflictRecord> = self
            .scheduler
            .read(|state| state.detector.registry().active().cloned().collect())?;
        records.sort_by(compare_by_urgency);
        Ok(records.iter().map(ConflictView::from).collect())
    }

    /// 查询冲突的候选方案（已排序；无可行方案时返回单个不可采纳的哨兵）
    pub fn get_recommendations(&self, conflict_id: &str) -> ApiResult<Vec<OptionView>> {
        let options = self.scheduler.recommendations(conflict_id)?;
        Ok(options
            .iter()
            .enumerate()
            .map(|(idx, option)| OptionView::build(option, idx + 1))
            .collect())
    }

    /// 采纳方案
    ///
    /// # 错误
    /// - AlreadyResolved: 冲突已被采纳过
    /// - StaleConflict: 冲突已过期，或方案已随推演变化（重新获取方案后再采纳）
    /// - NotFound: 冲突或方案不存在
    /// - InvalidAction: 方案动作在当前状态下不可行（状态不变）
    pub fn accept_option(
        &self,
        conflict_id: &str,
        option_id: &str,
        actor: &str,
    ) -> ApiResult<ImplementationOutcome> {
        let record = self.scheduler.accept(conflict_id, option_id, actor)?;

        // 履历写入失败不回滚已生效的调度动作
        let logged = match self.resolution_log.insert(&record) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    "采纳履历写入失败: conflict_id={}, option_id={}, error={}",
                    record.conflict_id,
                    record.option_id,
                    e
                );
                false
            }
        };
        Ok(ImplementationOutcome::build(&record, logged))
    }

    /// 订阅调度事件流
    pub fn subscribe(&self) -> impl Stream<Item = DispatchEvent> + Send + 'static {
        self.broadcaster.subscribe()
    }

    // ==========================================
    // 指标
    // ==========================================

    pub fn get_network_status(&self) -> ApiResult<NetworkStatus> {
        let threshold = self.config.slight_delay_threshold_minutes();
        let status = self.scheduler.read(|state| {
            kpi::network_status(
                &state.tracker.snapshot(),
                threshold,
                state.tracker.completed_count(),
            )
        })?;
        Ok(status)
    }

    pub fn get_conflict_statistics(&self) -> ApiResult<ConflictStatistics> {
        Ok(self
            .scheduler
            .read(|state| kpi::conflict_statistics(state.detector.registry()))?)
    }

    pub fn analyze_conflict_patterns(&self) -> ApiResult<ConflictPatterns> {
        Ok(self
            .scheduler
            .read(|state| kpi::conflict_patterns(state.detector.registry()))?)
    }

    // ==========================================
    // 履历 / What-if / 列车登记
    // ==========================================

    pub fn get_resolution_history(&self, limit: Option<usize>) -> ApiResult<Vec<ResolutionRecord>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit == 0 {
            return Err(ApiError::InvalidInput("limit 必须大于 0".to_string()));
        }
        Ok(self.resolution_log.list_recent(limit)?)
    }

    pub fn get_conflict_resolutions(&self, conflict_id: &str) -> ApiResult<Vec<ResolutionRecord>> {
        Ok(self.resolution_log.find_by_conflict(conflict_id)?)
    }

    /// 在快照上试算一组调度动作（不提交）
    pub fn run_what_if(&self, scenario: &[TrainAction]) -> ApiResult<WhatIfReport> {
        if scenario.is_empty() {
            return Err(ApiError::InvalidInput("试算场景不能为空".to_string()));
        }
        Ok(self.scheduler.what_if(scenario)?)
    }

    pub fn register_train(&self, train: Train) -> ApiResult<()> {
        let train_id = train.id.clone();
        self.scheduler.register_train(train)?;
        tracing::info!("登记列车: train_id={}", train_id);
        Ok(())
    }

    pub fn remove_train(&self, train_id: &str) -> ApiResult<()> {
        self.scheduler.remove_train(train_id)?;
        Ok(())
    }

    // ==========================================
    // 快照
    // ==========================================

    /// 保存调度快照，并按保留份数清理旧快照
    pub fn save_snapshot(&self) -> ApiResult<SnapshotInfo> {
        let payload = self.scheduler.export_snapshot()?;
        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| ApiError::InternalError(format!("快照序列化失败: {}", e)))?;
        let config_json = match self.config_manager.get_config_snapshot() {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!("配置快照读取失败，快照不附带配置: {}", e);
                None
            }
        };

        let entity = DispatchSnapshotEntity::new(
            payload.tick,
            payload.tracker.clock,
            payload.tracker.revision,
            payload_json,
            config_json,
        );
        let snapshot_id = self.snapshot_repo.save(&entity)?;
        let pruned = self.snapshot_repo.prune(self.config.snapshot_retention)?;
        tracing::info!(
            "保存调度快照: snapshot_id={}, tick={}, pruned={}",
            snapshot_id,
            entity.tick,
            pruned
        );

        Ok(SnapshotInfo {
            snapshot_id,
            tick: entity.tick,
            clock: entity.clock,
            revision: entity.revision,
            pruned,
        })
    }

    /// 从最近一次快照恢复；无快照时返回 None
    pub fn restore_snapshot(&self) -> ApiResult<Option<SnapshotInfo>> {
        let Some(entity) = self.snapshot_repo.load_latest()? else {
            return Ok(None);
        };
        let payload: DispatchSnapshotPayload = serde_json::from_str(&entity.payload_json)
            .map_err(|e| ApiError::InternalError(format!("快照反序列化失败: {}", e)))?;
        self.scheduler.restore_snapshot(payload)?;

        Ok(Some(SnapshotInfo {
            snapshot_id: entity.snapshot_id,
            tick: entity.tick,
            clock: entity.clock,
            revision: entity.revision,
            pruned: 0,
        }))
    }
}
