// ==========================================
// 铁路区段调度系统 - 列车状态跟踪器
// ==========================================
// 职责: 持有全部在途列车状态，按固定步长推进，执行调度动作
// 红线: Tracker 是列车状态的唯一事实来源；推进与推演使用同一运行规则
// ==========================================
// 运行规则:
// - 区段内按 max(now + 剩余里程/有效速度, 出清目标) 均匀行进
// - 到达区段末端后停留本段扣车时长，然后出清并进入下一段
// - 未发车列车于 max(now, 图定入段) + 发车扣车 时刻发车
// - 每次出清记录 (实际出清 - 图定出清) 的带符号晚点
// ==========================================

use crate::domain::train::{ActionKind, ItineraryLeg, Train, TrainAction, TrainPosition};
use crate::domain::types::{serde_secs, SectionId, TrainClass, TrainId};
use crate::engine::error::{DispatchError, DispatchResult};
use crate::engine::network::TrackNetwork;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const PROGRESS_EPS_KM: f64 = 1e-9;

// ==========================================
// 推演结果
// ==========================================

/// 单个行程段的预测占用 [entry, exit)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedLeg {
    pub leg_index: usize,
    pub section_id: SectionId,
    pub entry: NaiveDateTime,
    pub exit: NaiveDateTime,
    /// 推演时刻列车已在该段内
    pub inside: bool,
    /// 因早于出清目标而产生的等待（即可吸收扣车的缓冲）
    #[serde(with = "serde_secs")]
    pub schedule_wait: Duration,
}

/// 单列车的剩余行程推演
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainProjection {
    pub train_id: TrainId,
    pub class: TrainClass,
    pub legs: Vec<ProjectedLeg>,
    pub final_scheduled_exit: Option<NaiveDateTime>,
}

impl TrainProjection {
    pub fn final_exit(&self) -> Option<NaiveDateTime> {
        self.legs.last().map(|leg| leg.exit)
    }

    /// 终到晚点（带符号）
    pub fn final_delay(&self) -> Duration {
        match (self.final_exit(), self.final_scheduled_exit) {
            (Some(actual), Some(scheduled)) => actual - scheduled,
            _ => Duration::zero(),
        }
    }

    pub fn leg(&self, leg_index: usize) -> Option<&ProjectedLeg> {
        self.legs.iter().find(|leg| leg.leg_index == leg_index)
    }

    /// 截止 until 前完成出清的区段数
    pub fn clearances_before(&self, until: NaiveDateTime) -> usize {
        self.legs.iter().filter(|leg| leg.exit <= until).count()
    }
}

// ==========================================
// 推进报告
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryCrossing {
    pub train_id: TrainId,
    /// 出清的区段（发车时为 None）
    pub exited: Option<SectionId>,
    /// 进入的区段（终到时为 None）
    pub entered: Option<SectionId>,
    pub at: NaiveDateTime,
    #[serde(with = "serde_secs")]
    pub delay: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvanceReport {
    pub clock: Option<NaiveDateTime>,
    pub moved: Vec<TrainId>,
    pub crossings: Vec<BoundaryCrossing>,
    pub completed: Vec<TrainId>,
}

// ==========================================
// 可持久化状态
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    pub clock: NaiveDateTime,
    pub revision: u64,
    pub trains: BTreeMap<TrainId, Train>,
    pub completed_count: u64,
}

// ==========================================
// TrainTracker - 列车状态跟踪器
// ==========================================
#[derive(Debug, Clone)]
pub struct TrainTracker {
    network: Arc<TrackNetwork>,
    clock: NaiveDateTime,
    revision: u64,
    trains: BTreeMap<TrainId, Train>,
    completed_count: u64,
}

impl TrainTracker {
    pub fn new(network: Arc<TrackNetwork>, clock: NaiveDateTime) -> Self {
        Self {
            network,
            clock,
            revision: 0,
            trains: BTreeMap::new(),
            completed_count: 0,
        }
    }

    /// 从持久化状态恢复（校验引用的区段仍存在）
    pub fn from_state(network: Arc<TrackNetwork>, state: TrackerState) -> DispatchResult<Self> {
        for train in state.trains.values() {
            for leg in &train.itinerary {
                if network.section(&leg.section_id).is_none() {
                    return Err(DispatchError::InvalidTopology(format!(
                        "快照中列车 {} 引用了未定义区段 {}",
                        train.id, leg.section_id
                    )));
                }
            }
        }
        Ok(Self {
            network,
            clock: state.clock,
            revision: state.revision,
            trains: state.trains,
            completed_count: state.completed_count,
        })
    }

    pub fn state(&self) -> TrackerState {
        TrackerState {
            clock: self.clock,
            revision: self.revision,
            trains: self.trains.clone(),
            completed_count: self.completed_count,
        }
    }

    // ==========================================
    // 只读访问
    // ==========================================

    pub fn network(&self) -> &Arc<TrackNetwork> {
        &self.network
    }

    pub fn clock(&self) -> NaiveDateTime {
        self.clock
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn train(&self, train_id: &str) -> Option<&Train> {
        self.trains.get(train_id)
    }

    pub fn trains(&self) -> impl Iterator<Item = &Train> {
        self.trains.values()
    }

    pub fn active_count(&self) -> usize {
        self.trains.len()
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            inner: self.clone(),
        }
    }

    // ==========================================
    // 列车登记 / 注销
    // ==========================================

    /// 登记列车（校验行程区段存在、首尾相接、时刻有序）
    pub fn register_train(&mut self, mut train: Train) -> DispatchResult<()> {
        if self.trains.contains_key(&train.id) {
            return Err(DispatchError::invalid_action(&train.id, "列车已存在"));
        }
        if train.itinerary.is_empty() {
            return Err(DispatchError::invalid_action(&train.id, "行程为空"));
        }
        if !(train.max_speed_kmh > 0.0) {
            return Err(DispatchError::invalid_action(&train.id, "最高速度必须为正"));
        }

        let sections: Vec<SectionId> = train
            .itinerary
            .iter()
            .map(|leg| leg.section_id.clone())
            .collect();
        if let Some(missing) = sections.iter().find(|id| self.network.section(id).is_none()) {
            return Err(DispatchError::invalid_action(
                &train.id,
                format!("行程引用了未定义区段 {}", missing),
            ));
        }
        if !self.network.is_contiguous(&sections) {
            return Err(DispatchError::invalid_action(&train.id, "行程区段不连续"));
        }
        for (idx, leg) in train.itinerary.iter().enumerate() {
            if leg.scheduled_exit < leg.scheduled_entry {
                return Err(DispatchError::invalid_action(
                    &train.id,
                    format!("第 {} 段图定出清早于图定进入", idx + 1),
                ));
            }
            if idx > 0 && leg.scheduled_entry < train.itinerary[idx - 1].scheduled_entry {
                return Err(DispatchError::invalid_action(
                    &train.id,
                    format!("第 {} 段图定时刻倒序", idx + 1),
                ));
            }
        }

        if train.timetable.is_empty() {
            train.timetable = train.itinerary.clone();
        }
        train.updated_at = self.clock;

        tracing::debug!(
            "登记列车: train_id={}, class={}, legs={}",
            train.id,
            train.class,
            train.itinerary.len()
        );
        self.trains.insert(train.id.clone(), train);
        self.revision += 1;
        Ok(())
    }

    /// 注销列车（已发车未终到的列车不可删除）
    pub fn remove_train(&mut self, train_id: &str) -> DispatchResult<Train> {
        let train = self
            .trains
            .get(train_id)
            .ok_or_else(|| DispatchError::UnknownTrain(train_id.to_string()))?;
        if train.is_started() && !train.is_completed() {
            return Err(DispatchError::invalid_action(train_id, "列车运行中，不能删除"));
        }
        let removed = self
            .trains
            .remove(train_id)
            .ok_or_else(|| DispatchError::UnknownTrain(train_id.to_string()))?;
        self.revision += 1;
        Ok(removed)
    }

    // ==========================================
    // 推进
    // ==========================================

    /// 按步长推进全部列车；终到列车从跟踪器移除
    pub fn advance(&mut self, delta: Duration) -> DispatchResult<AdvanceReport> {
        if delta < Duration::zero() {
            return Err(DispatchError::Internal(format!(
                "推进步长不能为负: {}s",
                delta.num_seconds()
            )));
        }

        let start = self.clock;
        let end = start + delta;
        let mut report = AdvanceReport::default();

        for train in self.trains.values_mut() {
            let before = (train.position.clone(), train.departure_hold);
            advance_train(train, &self.network, start, end, &mut report.crossings);
            if (train.position.clone(), train.departure_hold) != before {
                train.updated_at = end;
                report.moved.push(train.id.clone());
            }
        }

        let completed: Vec<TrainId> = self
            .trains
            .values()
            .filter(|t| t.is_completed())
            .map(|t| t.id.clone())
            .collect();
        for train_id in &completed {
            self.trains.remove(train_id);
            tracing::info!("列车终到，移出跟踪: train_id={}", train_id);
        }
        self.completed_count += completed.len() as u64;
        report.completed = completed;

        self.clock = end;
        self.revision += 1;
        report.clock = Some(end);
        Ok(report)
    }

    // ==========================================
    // 调度动作
    // ==========================================

    /// 对单列车执行调度动作
    pub fn apply_action(&mut self, train_id: &str, action: &ActionKind) -> DispatchResult<()> {
        let clock = self.clock;
        let network = Arc::clone(&self.network);
        let projection = {
            let train = self
                .trains
                .get(train_id)
                .ok_or_else(|| DispatchError::UnknownTrain(train_id.to_string()))?;
            if train.is_completed() {
                return Err(DispatchError::invalid_action(train_id, "列车已终到"));
            }
            match action {
                ActionKind::Expedite { section_id, .. } => {
                    let m = train.find_pending_leg(section_id).ok_or_else(|| {
                        DispatchError::invalid_action(
                            train_id,
                            format!("区段 {} 不在剩余行程中", section_id),
                        )
                    })?;
                    Some((
                        project_train(train, &network, clock, None),
                        project_train(train, &network, clock, Some(m)),
                    ))
                }
                _ => None,
            }
        };

        let train = self
            .trains
            .get_mut(train_id)
            .ok_or_else(|| DispatchError::UnknownTrain(train_id.to_string()))?;

        match action {
            ActionKind::Hold {
                before_section,
                duration,
            } => apply_hold(train, before_section.as_deref(), *duration)?,
            ActionKind::Reroute { replace, via } => apply_reroute(train, &network, replace, via)?,
            ActionKind::Resequence {
                section_id,
                precedence,
            } => {
                if train.find_pending_leg(section_id).is_none() {
                    return Err(DispatchError::invalid_action(
                        train_id,
                        format!("区段 {} 不在剩余行程中", section_id),
                    ));
                }
                train.precedence.insert(section_id.clone(), *precedence);
            }
            ActionKind::Expedite { section_id, by } => {
                if *by <= Duration::zero() {
                    return Err(DispatchError::invalid_action(train_id, "提前量必须为正"));
                }
                let m = train.find_pending_leg(section_id).ok_or_else(|| {
                    DispatchError::invalid_action(
                        train_id,
                        format!("区段 {} 不在剩余行程中", section_id),
                    )
                })?;
                let capacity = match &projection {
                    Some((normal, free)) => expedite_capacity_of(normal, free, m),
                    None => Duration::zero(),
                };
                if *by > capacity {
                    return Err(DispatchError::invalid_action(
                        train_id,
                        format!(
                            "图定缓冲不足: 需要提前 {}s，可用 {}s",
                            by.num_seconds(),
                            capacity.num_seconds()
                        ),
                    ));
                }
                let first = train.first_pending_leg();
                for leg in train.itinerary.iter_mut().take(m + 1).skip(first) {
                    leg.expedite = leg.expedite + *by;
                }
            }
        }

        train.updated_at = clock;
        self.revision += 1;
        tracing::debug!("执行调度动作: train_id={}, action={}", train_id, action.name());
        Ok(())
    }

    /// 原子执行一组动作：任一失败则全部不生效
    pub fn apply_actions(&mut self, actions: &[TrainAction]) -> DispatchResult<()> {
        let mut staged = self.clone();
        for action in actions {
            staged.apply_action(&action.train_id, &action.kind)?;
        }
        *self = staged;
        Ok(())
    }

    // ==========================================
    // 推演
    // ==========================================

    pub fn project_all(&self) -> Vec<TrainProjection> {
        self.trains
            .values()
            .map(|train| project_train(train, &self.network, self.clock, None))
            .collect()
    }

    pub fn projection(&self, train_id: &str) -> Option<TrainProjection> {
        self.trains
            .get(train_id)
            .map(|train| project_train(train, &self.network, self.clock, None))
    }

    /// 在进入 section_id 前扣车时，不抬高终到晚点可吸收的缓冲
    pub fn slack_after(&self, train_id: &str, section_id: &str) -> DispatchResult<Duration> {
        let train = self
            .trains
            .get(train_id)
            .ok_or_else(|| DispatchError::UnknownTrain(train_id.to_string()))?;
        let m = train.find_pending_leg(section_id).ok_or_else(|| {
            DispatchError::invalid_action(train_id, format!("区段 {} 不在剩余行程中", section_id))
        })?;
        let projection = project_train(train, &self.network, self.clock, None);
        Ok(projection
            .legs
            .iter()
            .filter(|leg| leg.leg_index >= m)
            .fold(Duration::zero(), |acc, leg| acc + leg.schedule_wait))
    }

    /// 动用图定缓冲最多可将 section_id 的出清提前多少
    pub fn expedite_capacity(&self, train_id: &str, section_id: &str) -> DispatchResult<Duration> {
        let train = self
            .trains
            .get(train_id)
            .ok_or_else(|| DispatchError::UnknownTrain(train_id.to_string()))?;
        let m = train.find_pending_leg(section_id).ok_or_else(|| {
            DispatchError::invalid_action(train_id, format!("区段 {} 不在剩余行程中", section_id))
        })?;
        let normal = project_train(train, &self.network, self.clock, None);
        let free = project_train(train, &self.network, self.clock, Some(m));
        Ok(expedite_capacity_of(&normal, &free, m))
    }

    /// what-if：在副本上执行动作，不提交
    pub fn what_if(&self, actions: &[TrainAction]) -> DispatchResult<TrackerSnapshot> {
        let mut staged = self.clone();
        staged.apply_actions(actions)?;
        Ok(staged.snapshot())
    }
}

// ==========================================
// TrackerSnapshot - 只读快照
// ==========================================
#[derive(Debug, Clone)]
pub struct TrackerSnapshot {
    inner: TrainTracker,
}

impl TrackerSnapshot {
    pub fn clock(&self) -> NaiveDateTime {
        self.inner.clock()
    }

    pub fn revision(&self) -> u64 {
        self.inner.revision()
    }

    pub fn network(&self) -> &Arc<TrackNetwork> {
        self.inner.network()
    }

    pub fn train(&self, train_id: &str) -> Option<&Train> {
        self.inner.train(train_id)
    }

    pub fn trains(&self) -> impl Iterator<Item = &Train> {
        self.inner.trains()
    }

    pub fn project_all(&self) -> Vec<TrainProjection> {
        self.inner.project_all()
    }

    pub fn projection(&self, train_id: &str) -> Option<TrainProjection> {
        self.inner.projection(train_id)
    }

    pub fn slack_after(&self, train_id: &str, section_id: &str) -> DispatchResult<Duration> {
        self.inner.slack_after(train_id, section_id)
    }

    pub fn expedite_capacity(&self, train_id: &str, section_id: &str) -> DispatchResult<Duration> {
        self.inner.expedite_capacity(train_id, section_id)
    }

    pub fn what_if(&self, actions: &[TrainAction]) -> DispatchResult<TrackerSnapshot> {
        self.inner.what_if(actions)
    }

    pub fn state(&self) -> TrackerState {
        self.inner.state()
    }
}

// ==========================================
// 运行规则（推进与推演共用）
// ==========================================

fn effective_speed(train: &Train, network: &TrackNetwork, section_id: &str) -> f64 {
    network
        .section(section_id)
        .map(|s| s.line_speed_kmh.min(train.max_speed_kmh))
        .unwrap_or(train.max_speed_kmh)
}

fn section_length(network: &TrackNetwork, section_id: &str) -> f64 {
    network
        .section(section_id)
        .map(|s| s.length_km)
        .unwrap_or(0.0)
}

/// 以给定速度走完 distance_km 所需时间（毫秒向上取整）
fn run_time(distance_km: f64, speed_kmh: f64) -> Duration {
    if distance_km <= PROGRESS_EPS_KM || !(speed_kmh > 0.0) {
        return Duration::zero();
    }
    let ms = (distance_km * 3_600_000.0 / speed_kmh - 1e-6).ceil().max(0.0);
    Duration::milliseconds(ms as i64)
}

/// 推演单列车剩余行程；free_run_through 之前（含）的段忽略出清目标，按最快运行
pub(crate) fn project_train(
    train: &Train,
    network: &TrackNetwork,
    now: NaiveDateTime,
    free_run_through: Option<usize>,
) -> TrainProjection {
    let free = |idx: usize| free_run_through.map_or(false, |m| idx <= m);
    let mut legs = Vec::with_capacity(train.itinerary.len());

    let start_idx;
    let mut cursor;
    match &train.position {
        TrainPosition::Completed => {
            start_idx = train.itinerary.len();
            cursor = now;
        }
        TrainPosition::NotStarted => {
            start_idx = 0;
            cursor = match train.itinerary.first() {
                Some(first) => now.max(first.scheduled_entry) + train.departure_hold,
                None => now,
            };
        }
        TrainPosition::InSection {
            leg_index,
            progress_km,
        } => {
            start_idx = leg_index + 1;
            cursor = now;
            if let Some(leg) = train.itinerary.get(*leg_index) {
                let speed = effective_speed(train, network, &leg.section_id);
                let remaining = (section_length(network, &leg.section_id) - progress_km).max(0.0);
                let natural = now + run_time(remaining, speed);
                let arrive = if free(*leg_index) {
                    natural
                } else {
                    natural.max(leg.exit_target())
                };
                let exit = arrive + leg.hold;
                legs.push(ProjectedLeg {
                    leg_index: *leg_index,
                    section_id: leg.section_id.clone(),
                    entry: leg.actual_entry.unwrap_or(now),
                    exit,
                    inside: true,
                    schedule_wait: arrive - natural,
                });
                cursor = exit;
            }
        }
    }

    for (idx, leg) in train.itinerary.iter().enumerate().skip(start_idx) {
        let speed = effective_speed(train, network, &leg.section_id);
        let natural = cursor + run_time(section_length(network, &leg.section_id), speed);
        let arrive = if free(idx) {
            natural
        } else {
            natural.max(leg.exit_target())
        };
        let exit = arrive + leg.hold;
        legs.push(ProjectedLeg {
            leg_index: idx,
            section_id: leg.section_id.clone(),
            entry: cursor,
            exit,
            inside: false,
            schedule_wait: arrive - natural,
        });
        cursor = exit;
    }

    TrainProjection {
        train_id: train.id.clone(),
        class: train.class,
        legs,
        final_scheduled_exit: train.itinerary.last().map(|leg| leg.scheduled_exit),
    }
}

fn expedite_capacity_of(normal: &TrainProjection, free: &TrainProjection, m: usize) -> Duration {
    match (normal.leg(m), free.leg(m)) {
        (Some(a), Some(b)) if a.exit > b.exit => a.exit - b.exit,
        _ => Duration::zero(),
    }
}

/// 单列车在 [start, end) 内推进
fn advance_train(
    train: &mut Train,
    network: &TrackNetwork,
    start: NaiveDateTime,
    end: NaiveDateTime,
    crossings: &mut Vec<BoundaryCrossing>,
) {
    let mut t = start;
    loop {
        match train.position.clone() {
            TrainPosition::Completed => break,
            TrainPosition::NotStarted => {
                let Some(first) = train.itinerary.first() else {
                    train.position = TrainPosition::Completed;
                    break;
                };
                if first.scheduled_entry >= end {
                    break;
                }
                t = t.max(first.scheduled_entry);
                if train.departure_hold > Duration::zero() {
                    let take = train.departure_hold.min(end - t);
                    train.departure_hold = train.departure_hold - take;
                    t = t + take;
                    if train.departure_hold > Duration::zero() {
                        break;
                    }
                }
                let section = first.section_id.clone();
                train.itinerary[0].actual_entry = Some(t);
                train.position = TrainPosition::InSection {
                    leg_index: 0,
                    progress_km: 0.0,
                };
                crossings.push(BoundaryCrossing {
                    train_id: train.id.clone(),
                    exited: None,
                    entered: Some(section),
                    at: t,
                    delay: t - train.itinerary[0].scheduled_entry,
                });
            }
            TrainPosition::InSection {
                leg_index,
                progress_km,
            } => {
                let (section_id, target) = {
                    let leg = &train.itinerary[leg_index];
                    (leg.section_id.clone(), leg.exit_target())
                };
                let length = section_length(network, &section_id);
                let remaining = (length - progress_km).max(0.0);

                // 运行阶段
                if remaining > PROGRESS_EPS_KM {
                    let speed = effective_speed(train, network, &section_id);
                    let run_end = (t + run_time(remaining, speed)).max(target);
                    if run_end > end {
                        let total = (run_end - t).num_milliseconds() as f64;
                        let step = (end - t).num_milliseconds() as f64;
                        let fraction = if total > 0.0 { step / total } else { 1.0 };
                        train.position = TrainPosition::InSection {
                            leg_index,
                            progress_km: (progress_km + remaining * fraction).min(length),
                        };
                        break;
                    }
                    t = run_end;
                    train.position = TrainPosition::InSection {
                        leg_index,
                        progress_km: length,
                    };
                } else if target > t {
                    if target > end {
                        break;
                    }
                    t = target;
                }

                // 扣车阶段
                let hold = train.itinerary[leg_index].hold;
                if hold > Duration::zero() {
                    let take = hold.min(end - t);
                    train.itinerary[leg_index].hold = hold - take;
                    t = t + take;
                    if train.itinerary[leg_index].hold > Duration::zero() {
                        break;
                    }
                }

                // 出清
                let delay = t - train.itinerary[leg_index].scheduled_exit;
                train.itinerary[leg_index].actual_exit = Some(t);
                train.last_boundary_delay = delay;

                let next = leg_index + 1;
                let entered = if next < train.itinerary.len() {
                    train.itinerary[next].actual_entry = Some(t);
                    train.position = TrainPosition::InSection {
                        leg_index: next,
                        progress_km: 0.0,
                    };
                    Some(train.itinerary[next].section_id.clone())
                } else {
                    train.position = TrainPosition::Completed;
                    None
                };
                crossings.push(BoundaryCrossing {
                    train_id: train.id.clone(),
                    exited: Some(section_id),
                    entered,
                    at: t,
                    delay,
                });
            }
        }
    }
}

// ==========================================
// 动作实现
// ==========================================

fn apply_hold(train: &mut Train, before_section: Option<&str>, duration: Duration) -> DispatchResult<()> {
    if duration <= Duration::zero() {
        return Err(DispatchError::invalid_action(&train.id, "扣车时长必须为正"));
    }

    match before_section {
        None => match train.position {
            TrainPosition::NotStarted => {
                train.departure_hold = train.departure_hold + duration;
            }
            TrainPosition::InSection { leg_index, .. } => {
                let leg = &mut train.itinerary[leg_index];
                leg.hold = leg.hold + duration;
            }
            TrainPosition::Completed => {
                return Err(DispatchError::invalid_action(&train.id, "列车已终到"));
            }
        },
        Some(section_id) => {
            let m = train.find_pending_leg(section_id).ok_or_else(|| {
                DispatchError::invalid_action(
                    &train.id,
                    format!("区段 {} 不在剩余行程中", section_id),
                )
            })?;
            if train.current_leg_index() == Some(m) {
                return Err(DispatchError::invalid_action(
                    &train.id,
                    format!("列车已进入区段 {}，无法在其前方扣车", section_id),
                ));
            }
            if m == 0 {
                train.departure_hold = train.departure_hold + duration;
            } else {
                let leg = &mut train.itinerary[m - 1];
                leg.hold = leg.hold + duration;
            }
        }
    }
    Ok(())
}

fn apply_reroute(
    train: &mut Train,
    network: &TrackNetwork,
    replace: &[SectionId],
    via: &[SectionId],
) -> DispatchResult<()> {
    if replace.is_empty() || via.is_empty() {
        return Err(DispatchError::invalid_action(&train.id, "改路区段序列不能为空"));
    }
    if replace == via {
        return Err(DispatchError::invalid_action(&train.id, "改路前后径路相同"));
    }

    // 只允许改未进入的后续行程
    let first_free = match train.position {
        TrainPosition::NotStarted => 0,
        TrainPosition::InSection { leg_index, .. } => leg_index + 1,
        TrainPosition::Completed => {
            return Err(DispatchError::invalid_action(&train.id, "列车已终到"));
        }
    };
    let start = (first_free..train.itinerary.len())
        .find(|&s| {
            s + replace.len() <= train.itinerary.len()
                && train.itinerary[s..s + replace.len()]
                    .iter()
                    .zip(replace)
                    .all(|(leg, id)| &leg.section_id == id)
        })
        .ok_or_else(|| {
            DispatchError::invalid_action(&train.id, "被替换区段不在未进入的后续行程中")
        })?;

    if !network.is_contiguous(via) {
        return Err(DispatchError::invalid_action(&train.id, "迂回径路不连续或含未定义区段"));
    }
    if network.path_endpoints(replace) != network.path_endpoints(via) {
        return Err(DispatchError::invalid_action(&train.id, "迂回径路起止点与原径路不一致"));
    }

    let end = start + replace.len() - 1;
    let window_start = train.itinerary[start].scheduled_entry;
    let window_end = train.itinerary[end].scheduled_exit;

    let restored = restore_from_timetable(train, via, window_start, window_end);
    let replace_len = network.path_length_km(replace).unwrap_or(0.0);
    let via_len = network.path_length_km(via).unwrap_or(0.0);
    if restored.is_none() && via_len + 1e-9 < replace_len {
        return Err(DispatchError::invalid_action(
            &train.id,
            format!(
                "迂回径路短于原径路（{:.2}km < {:.2}km），仅允许回到图定径路",
                via_len, replace_len
            ),
        ));
    }

    let mut new_legs = restored.unwrap_or_else(|| {
        distribute_window(network, via, window_start, window_end)
    });

    // 被替换段上已追加的扣车保留到新径路末段
    let carried_hold = train.itinerary[start..=end]
        .iter()
        .fold(Duration::zero(), |acc, leg| acc + leg.hold);
    if let Some(last) = new_legs.last_mut() {
        last.hold = last.hold + carried_hold;
    }

    train.itinerary.splice(start..=end, new_legs);
    Ok(())
}

/// via 恰为图定行程中同一时间窗的连续段时，直接取回图定计划
fn restore_from_timetable(
    train: &Train,
    via: &[SectionId],
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
) -> Option<Vec<ItineraryLeg>> {
    let tt = &train.timetable;
    (0..tt.len()).find_map(|s| {
        if s + via.len() > tt.len() {
            return None;
        }
        let run = &tt[s..s + via.len()];
        let same_sections = run.iter().zip(via).all(|(leg, id)| &leg.section_id == id);
        let same_window = run.first().map(|l| l.scheduled_entry) == Some(window_start)
            && run.last().map(|l| l.scheduled_exit) == Some(window_end);
        if same_sections && same_window {
            Some(
                run.iter()
                    .map(|leg| ItineraryLeg::new(leg.section_id.clone(), leg.scheduled_entry, leg.scheduled_exit))
                    .collect(),
            )
        } else {
            None
        }
    })
}

/// 按长度比例把图定时间窗分配到新径路各段
fn distribute_window(
    network: &TrackNetwork,
    via: &[SectionId],
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
) -> Vec<ItineraryLeg> {
    let total_secs = (window_end - window_start).num_seconds().max(0);
    let lengths: Vec<f64> = via
        .iter()
        .map(|id| network.section(id).map(|s| s.length_km).unwrap_or(0.0))
        .collect();
    let total_len: f64 = lengths.iter().sum();

    let mut legs = Vec::with_capacity(via.len());
    let mut cursor = window_start;
    let mut acc_len = 0.0;
    for (idx, id) in via.iter().enumerate() {
        acc_len += lengths[idx];
        let exit = if idx + 1 == via.len() {
            window_end
        } else if total_len > 0.0 {
            window_start + Duration::seconds((total_secs as f64 * acc_len / total_len).round() as i64)
        } else {
            window_start
                + Duration::seconds(total_secs * (idx as i64 + 1) / via.len() as i64)
        };
        legs.push(ItineraryLeg::new(id.clone(), cursor, exit));
        cursor = exit;
    }
    legs
}

/// 列车当前位置（按区段进度在起止节点之间线性插值）
pub fn train_location(train: &Train, network: &TrackNetwork) -> Option<(f64, f64)> {
    let (section_id, progress) = match &train.position {
        TrainPosition::InSection {
            leg_index,
            progress_km,
        } => (&train.itinerary.get(*leg_index)?.section_id, *progress_km),
        TrainPosition::NotStarted => (&train.itinerary.first()?.section_id, 0.0),
        TrainPosition::Completed => (&train.itinerary.last()?.section_id, f64::MAX),
    };
    let section = network.section(section_id)?;
    let from = network.node(&section.from)?;
    let to = network.node(&section.to)?;
    let ratio = if section.length_km > 0.0 {
        (progress / section.length_km).clamp(0.0, 1.0)
    } else {
        0.0
    };
    Some((
        from.lat + (to.lat - from.lat) * ratio,
        from.lng + (to.lng - from.lng) * ratio,
    ))
}

/// 当前有效运行速度（km/h），未发车或停留时为 0
pub fn current_speed_kmh(train: &Train, network: &TrackNetwork, now: NaiveDateTime) -> f64 {
    let TrainPosition::InSection {
        leg_index,
        progress_km,
    } = train.position
    else {
        return 0.0;
    };
    let Some(leg) = train.itinerary.get(leg_index) else {
        return 0.0;
    };
    let remaining = (section_length(network, &leg.section_id) - progress_km).max(0.0);
    if remaining <= PROGRESS_EPS_KM {
        return 0.0;
    }
    let speed = effective_speed(train, network, &leg.section_id);
    let run_end = (now + run_time(remaining, speed)).max(leg.exit_target());
    let hours = (run_end - now).num_milliseconds() as f64 / 3_600_000.0;
    if hours > 0.0 {
        remaining / hours
    } else {
        speed
    }
}

#[cfg(test)]
mod tests;
