// ==========================================
// 铁路区段调度系统 - 调度主循环
// ==========================================
// 职责: 单一逻辑时钟驱动 推进 → 扫描 → 生成方案 → 发布事件
// 红线: 唯一写者；tick 在状态副本上执行，成功后整体替换
// 红线: 方案在只读快照上计算（锁外），写回前复核冲突仍为 Active 且推演版本未变
// ==========================================

use crate::config::DispatchConfig;
use crate::domain::conflict::ConflictRecord;
use crate::domain::resolution::{ResolutionOption, ResolutionRecord};
use crate::domain::train::{Train, TrainAction};
use crate::domain::types::{duration_minutes, ConflictId, TrainId};
use crate::engine::detector::{ConflictDetector, ConflictRegistry, DetectionParams, ScanReport};
use crate::engine::error::{DispatchError, DispatchResult};
use crate::engine::events::{DispatchEvent, OptionalEventPublisher};
use crate::engine::kpi::{self, WhatIfReport};
use crate::engine::recommender::ResolutionRecommender;
use crate::engine::tracker::{TrackerSnapshot, TrackerState, TrainTracker};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

// ==========================================
// DispatchState - 共享调度状态
// ==========================================
#[derive(Debug, Clone)]
pub struct DispatchState {
    pub tracker: TrainTracker,
    pub detector: ConflictDetector,
    /// 活动冲突的候选方案缓存（按冲突ID）
    pub recommendations: BTreeMap<ConflictId, Vec<ResolutionOption>>,
    pub tick: u64,
}

impl DispatchState {
    pub fn new(tracker: TrainTracker, detection: DetectionParams) -> Self {
        Self {
            tracker,
            detector: ConflictDetector::new(detection),
            recommendations: BTreeMap::new(),
            tick: 0,
        }
    }
}

/// 调度状态快照（落库用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSnapshotPayload {
    pub tick: u64,
    pub tracker: TrackerState,
    pub registry: ConflictRegistry,
}

/// 单次 tick 结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub clock: Option<NaiveDateTime>,
    pub moved: usize,
    pub completed: Vec<TrainId>,
    pub scan: ScanReport,
    pub recommended: usize,
    pub events: usize,
}

/// tick 写锁阶段的产出：待生成方案的新冲突 + 对应快照
struct TickOutcome {
    report: TickReport,
    pending: Vec<ConflictRecord>,
    snapshot: TrackerSnapshot,
}

type Recommendations = Vec<(ConflictId, Vec<ResolutionOption>)>;

fn compute_recommendations(
    recommender: &ResolutionRecommender,
    pending: &[ConflictRecord],
    snapshot: &TrackerSnapshot,
) -> Recommendations {
    pending
        .iter()
        .map(|record| {
            (
                record.conflict_id.clone(),
                recommender.recommend(record, snapshot),
            )
        })
        .collect()
}

/// 方案是否基于当前推演版本计算
fn is_current(options: &[ResolutionOption], revision: u64) -> bool {
    options
        .first()
        .map_or(false, |o| o.computed_at_revision == revision)
}

// ==========================================
// DispatchScheduler
// ==========================================
pub struct DispatchScheduler {
    state: Arc<RwLock<DispatchState>>,
    recommender: Arc<ResolutionRecommender>,
    publisher: OptionalEventPublisher,
    step: Duration,
}

impl DispatchScheduler {
    pub fn new(tracker: TrainTracker, config: &DispatchConfig, publisher: OptionalEventPublisher) -> Self {
        let state = DispatchState::new(tracker, config.detection_params());
        Self {
            state: Arc::new(RwLock::new(state)),
            recommender: Arc::new(ResolutionRecommender::new(config.recommender_params())),
            publisher,
            step: config.tick_interval(),
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn publisher(&self) -> &OptionalEventPublisher {
        &self.publisher
    }

    fn read_state(&self) -> DispatchResult<RwLockReadGuard<'_, DispatchState>> {
        self.state
            .read()
            .map_err(|e| DispatchError::Internal(format!("状态读锁获取失败: {}", e)))
    }

    fn write_state(&self) -> DispatchResult<RwLockWriteGuard<'_, DispatchState>> {
        self.state
            .write()
            .map_err(|e| DispatchError::Internal(format!("状态写锁获取失败: {}", e)))
    }

    /// 在读锁下访问一致状态
    pub fn read<T>(&self, f: impl FnOnce(&DispatchState) -> T) -> DispatchResult<T> {
        let guard = self.read_state()?;
        Ok(f(&guard))
    }

    pub fn snapshot(&self) -> DispatchResult<TrackerSnapshot> {
        self.read(|state| state.tracker.snapshot())
    }

    // ==========================================
    // tick
    // ==========================================

    /// 同步执行一次 tick（含新冲突的方案生成）
    pub fn tick(&self) -> DispatchResult<TickReport> {
        let outcome = self.tick_core()?;
        let results = compute_recommendations(&self.recommender, &outcome.pending, &outcome.snapshot);
        let mut report = outcome.report;
        report.recommended = self.store_recommendations(results)?;
        Ok(report)
    }

    /// 写锁阶段：推进 + 扫描；失败时状态保持不变
    fn tick_core(&self) -> DispatchResult<TickOutcome> {
        let mut events = Vec::new();
        let outcome = {
            let mut guard = self.write_state()?;
            let mut next = guard.clone();
            next.tick += 1;
            let tick = next.tick;

            let advance = next.tracker.advance(self.step)?;
            let snapshot = next.tracker.snapshot();
            let scan = next.detector.scan(&snapshot);

            let registry = next.detector.registry();
            next.recommendations
                .retain(|id, _| registry.get(id).map_or(false, |r| r.is_active()));
            let pending: Vec<ConflictRecord> = scan
                .detected
                .iter()
                .filter_map(|id| registry.get(id).cloned())
                .collect();

            for crossing in &advance.crossings {
                events.push(DispatchEvent::TrainUpdated {
                    tick,
                    train_id: crossing.train_id.clone(),
                    section_id: crossing.entered.clone(),
                    delay_minutes: duration_minutes(crossing.delay).max(0.0),
                    at: crossing.at,
                });
            }
            for train_id in &advance.completed {
                events.push(DispatchEvent::TrainCompleted {
                    tick,
                    train_id: train_id.clone(),
                    at: snapshot.clock(),
                });
            }
            events.extend(
                pending
                    .iter()
                    .map(|record| DispatchEvent::conflict_detected(tick, record)),
            );
            events.extend(scan.expired.iter().map(|id| DispatchEvent::ConflictExpired {
                tick,
                conflict_id: id.clone(),
            }));

            let report = TickReport {
                tick,
                clock: advance.clock,
                moved: advance.moved.len(),
                completed: advance.completed.clone(),
                scan,
                recommended: 0,
                events: events.len(),
            };
            *guard = next;
            TickOutcome {
                report,
                pending,
                snapshot,
            }
        };

        tracing::debug!(
            "tick 完成: tick={}, moved={}, completed={}, detected={}, expired={}, events={}",
            outcome.report.tick,
            outcome.report.moved,
            outcome.report.completed.len(),
            outcome.report.scan.detected.len(),
            outcome.report.scan.expired.len(),
            events.len()
        );
        for event in events {
            self.publisher.publish(event);
        }
        Ok(outcome)
    }

    /// 写回方案；冲突已不再 Active 或推演版本已变化的丢弃
    fn store_recommendations(&self, results: Recommendations) -> DispatchResult<usize> {
        let mut guard = self.write_state()?;
        let state = &mut *guard;
        let revision = state.tracker.revision();
        let mut stored = 0;
        for (conflict_id, options) in results {
            let active = state
                .detector
                .registry()
                .get(&conflict_id)
                .map_or(false, |r| r.is_active());
            if !active {
                tracing::debug!("冲突已不再活动，丢弃方案: conflict_id={}", conflict_id);
            } else if !is_current(&options, revision) {
                tracing::debug!(
                    "推演版本已变化，丢弃方案: conflict_id={}, revision={}",
                    conflict_id,
                    revision
                );
            } else {
                state.recommendations.insert(conflict_id, options);
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// 异步主循环：按 tick 间隔驱动，直到 shutdown 完成
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let period = self
            .step
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!("调度主循环启动: step={}s", self.step.num_seconds());
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("收到停止信号，调度主循环退出");
                    break;
                }
                _ = interval.tick() => {
                    let outcome = match self.tick_core() {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::error!("tick 失败，状态保持不变: {}", e);
                            continue;
                        }
                    };
                    if outcome.pending.is_empty() {
                        continue;
                    }

                    let recommender = Arc::clone(&self.recommender);
                    let TickOutcome { pending, snapshot, .. } = outcome;
                    let computed = tokio::task::spawn_blocking(move || {
                        compute_recommendations(&recommender, &pending, &snapshot)
                    })
                    .await;
                    match computed {
                        Ok(results) => {
                            if let Err(e) = self.store_recommendations(results) {
                                tracing::error!("方案写回失败: {}", e);
                            }
                        }
                        Err(e) => tracing::error!("方案计算任务失败: {}", e),
                    }
                }
            }
        }
    }

    // ==========================================
    // 方案查询 / 采纳
    // ==========================================

    /// 获取冲突的候选方案；缓存缺失或已过时则在快照上现算（锁外）
    pub fn recommendations(&self, conflict_id: &str) -> DispatchResult<Vec<ResolutionOption>> {
        Ok(self.current_options(conflict_id)?.0)
    }

    /// 返回 (当前版本的方案, 缓存中被替换掉的过时方案)
    fn current_options(
        &self,
        conflict_id: &str,
    ) -> DispatchResult<(Vec<ResolutionOption>, Option<Vec<ResolutionOption>>)> {
        let (record, snapshot, cached) = {
            let state = self.read_state()?;
            let record = state.detector.registry().ensure_active(conflict_id)?.clone();
            let cached = state.recommendations.get(conflict_id).cloned();
            if let Some(options) = &cached {
                if is_current(options, state.tracker.revision()) {
                    return Ok((options.clone(), None));
                }
            }
            (record, state.tracker.snapshot(), cached)
        };

        let options = self.recommender.recommend(&record, &snapshot);
        self.store_recommendations(vec![(conflict_id.to_string(), options.clone())])?;
        Ok((options, cached))
    }

    /// 采纳方案：锁外取当前版本方案 → 写锁下复核状态与版本 → 原子执行动作 → 标记已疏解
    ///
    /// # 错误
    /// - StaleConflict: 冲突已过期；或该方案的动作与调用方此前看到的不同、推演版本在计算期间变化（需重新获取方案）
    pub fn accept(&self, conflict_id: &str, option_id: &str, actor: &str) -> DispatchResult<ResolutionRecord> {
        let (options, previous) = self.current_options(conflict_id)?;
        let option = options
            .into_iter()
            .find(|o| o.option_id == option_id)
            .filter(|o| !o.is_sentinel())
            .ok_or_else(|| DispatchError::UnknownOption {
                conflict_id: conflict_id.to_string(),
                option_id: option_id.to_string(),
            })?;
        if let Some(previous) = previous {
            let seen = previous.iter().find(|o| o.option_id == option_id);
            if seen.map_or(true, |o| o.actions != option.actions) {
                tracing::warn!(
                    "方案已随推演变化，需重新获取: conflict_id={}, option_id={}",
                    conflict_id,
                    option_id
                );
                return Err(DispatchError::StaleConflict(conflict_id.to_string()));
            }
        }

        let record = {
            let mut guard = self.write_state()?;
            let state = &mut *guard;
            let conflict = state.detector.registry().ensure_active(conflict_id)?.clone();
            if state.tracker.revision() != option.computed_at_revision {
                tracing::warn!(
                    "方案计算期间推演版本已变化: conflict_id={}, computed_at={}, current={}",
                    conflict_id,
                    option.computed_at_revision,
                    state.tracker.revision()
                );
                return Err(DispatchError::StaleConflict(conflict_id.to_string()));
            }

            if let Err(e) = state.tracker.apply_actions(&option.actions) {
                tracing::warn!(
                    "方案动作被拒绝: conflict_id={}, option_id={}, error={}",
                    conflict_id,
                    option_id,
                    e
                );
                return Err(e);
            }
            let now = state.tracker.clock();
            state
                .detector
                .registry_mut()
                .resolve(conflict_id, &option.option_id, now)?;
            // 动作改变了推演，其余缓存方案一并作废
            state.recommendations.clear();

            ResolutionRecord {
                record_id: Uuid::new_v4().to_string(),
                conflict_id: conflict_id.to_string(),
                option_id: option.option_id,
                strategy: option.strategy,
                section_id: conflict.contention.section_id,
                actions: option.actions,
                impact: option.impact,
                explanation: option.explanation,
                accepted_at: now,
                tick: state.tick,
                actor: actor.to_string(),
            }
        };

        tracing::info!(
            "采纳疏解方案: conflict_id={}, option_id={}, strategy={}, actor={}",
            record.conflict_id,
            record.option_id,
            record.strategy.as_str(),
            record.actor
        );
        self.publisher.publish(DispatchEvent::ConflictResolved {
            tick: record.tick,
            conflict_id: record.conflict_id.clone(),
            option_id: record.option_id.clone(),
            strategy: record.strategy,
        });
        Ok(record)
    }

    // ==========================================
    // What-if / 列车登记 / 快照
    // ==========================================

    pub fn what_if(&self, actions: &[TrainAction]) -> DispatchResult<WhatIfReport> {
        let (before, params) = self.read(|state| (state.tracker.snapshot(), *state.detector.params()))?;
        let after = before.what_if(actions)?;
        Ok(kpi::what_if_summary(&before, &after, &params))
    }

    pub fn register_train(&self, train: Train) -> DispatchResult<()> {
        let mut state = self.write_state()?;
        state.tracker.register_train(train)?;
        state.recommendations.clear();
        Ok(())
    }

    pub fn remove_train(&self, train_id: &str) -> DispatchResult<Train> {
        let mut state = self.write_state()?;
        let removed = state.tracker.remove_train(train_id)?;
        state.recommendations.clear();
        tracing::info!("注销列车: train_id={}", train_id);
        Ok(removed)
    }

    pub fn export_snapshot(&self) -> DispatchResult<DispatchSnapshotPayload> {
        self.read(|state| DispatchSnapshotPayload {
            tick: state.tick,
            tracker: state.tracker.state(),
            registry: state.detector.registry().clone(),
        })
    }

    /// 用快照整体替换状态（线路沿用当前加载的线路）
    pub fn restore_snapshot(&self, payload: DispatchSnapshotPayload) -> DispatchResult<()> {
        let mut guard = self.write_state()?;
        let network = Arc::clone(guard.tracker.network());
        let tracker = TrainTracker::from_state(network, payload.tracker)?;
        let params = *guard.detector.params();
        *guard = DispatchState {
            tracker,
            detector: ConflictDetector::with_registry(params, payload.registry),
            recommendations: BTreeMap::new(),
            tick: payload.tick,
        };
        tracing::info!("已恢复调度快照: tick={}", payload.tick);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
