// ==========================================
// 铁路区段调度系统 - API DTO 定义
// ==========================================
// 职责: 定义 DispatchApi 的响应结构（只读视图）
// ==========================================

use crate::domain::conflict::ConflictRecord;
use crate::domain::resolution::{OptionImpact, ResolutionOption, ResolutionRecord};
use crate::domain::train::{Train, TrainAction, TrainPosition};
use crate::domain::types::{
    duration_minutes, ConflictStatus, ResolutionStrategy, SectionId, SeverityLevel, TrainClass,
    TrainStatus,
};
use crate::engine::network::TrackNetwork;
use crate::engine::tracker::{current_speed_kmh, train_location, TrainProjection};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// 列车视图
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainView {
    pub train_id: String,
    pub name: String,
    pub class: TrainClass,
    pub status: TrainStatus,
    /// 报告晚点（分钟，≥0）
    pub delay_minutes: f64,
    /// 推演终到晚点（分钟，可为负）
    pub projected_delay_minutes: f64,
    /// not_started / in_section / completed
    pub state: String,
    pub section_id: Option<SectionId>,
    pub next_section_id: Option<SectionId>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub speed_kmh: f64,
    pub remaining_sections: Vec<SectionId>,
    pub updated_at: NaiveDateTime,
}

impl TrainView {
    pub fn build(
        train: &Train,
        network: &TrackNetwork,
        projection: Option<&TrainProjection>,
        now: NaiveDateTime,
        slight_threshold_minutes: f64,
    ) -> Self {
        let delay_minutes = train.reported_delay_minutes();
        let state = match train.position {
            TrainPosition::NotStarted => "not_started",
            TrainPosition::InSection { .. } => "in_section",
            TrainPosition::Completed => "completed",
        };
        let next_section_id = match train.position {
            TrainPosition::NotStarted => train.itinerary.first(),
            TrainPosition::InSection { leg_index, .. } => train.itinerary.get(leg_index + 1),
            TrainPosition::Completed => None,
        }
        .map(|leg| leg.section_id.clone());
        let location = train_location(train, network);

        Self {
            train_id: train.id.clone(),
            name: train.name.clone(),
            class: train.class,
            status: TrainStatus::from_delay(delay_minutes, slight_threshold_minutes),
            delay_minutes,
            projected_delay_minutes: projection
                .map(|p| duration_minutes(p.final_delay()))
                .unwrap_or(0.0),
            state: state.to_string(),
            section_id: train.current_section().cloned(),
            next_section_id,
            lat: location.map(|(lat, _)| lat),
            lng: location.map(|(_, lng)| lng),
            speed_kmh: current_speed_kmh(train, network, now),
            remaining_sections: train.remaining_sections(),
            updated_at: train.updated_at,
        }
    }
}

// ==========================================
// 冲突视图
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictView {
    pub conflict_id: String,
    pub section_id: SectionId,
    pub section_kind: String,
    pub capacity: u32,
    pub leader_id: String,
    pub leader_class: TrainClass,
    pub follower_id: String,
    pub follower_class: TrainClass,
    pub overlap_start: NaiveDateTime,
    pub overlap_end: NaiveDateTime,
    pub overlap_minutes: f64,
    /// 距重叠开始的分钟数（≤0 表示正在发生）
    pub time_to_entry_minutes: f64,
    pub severity: SeverityLevel,
    pub score: f64,
    pub status: ConflictStatus,
    pub detected_at: NaiveDateTime,
}

impl From<&ConflictRecord> for ConflictView {
    fn from(record: &ConflictRecord) -> Self {
        let c = &record.contention;
        Self {
            conflict_id: record.conflict_id.clone(),
            section_id: c.section_id.clone(),
            section_kind: c.section_kind.as_str().to_string(),
            capacity: c.capacity,
            leader_id: c.leader.train_id.clone(),
            leader_class: c.leader.class,
            follower_id: c.follower.train_id.clone(),
            follower_class: c.follower.class,
            overlap_start: c.overlap_start,
            overlap_end: c.overlap_end,
            overlap_minutes: duration_minutes(c.overlap()),
            time_to_entry_minutes: c.time_to_entry_secs as f64 / 60.0,
            severity: c.severity.level,
            score: c.severity.score,
            status: record.status,
            detected_at: record.detected_at,
        }
    }
}

// ==========================================
// 方案视图
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionView {
    pub option_id: String,
    pub conflict_id: String,
    pub strategy: ResolutionStrategy,
    /// 哨兵方案（无可行方案）不可采纳
    pub feasible: bool,
    pub actions: Vec<TrainAction>,
    pub impact: OptionImpact,
    pub cost_bearer: Option<TrainClass>,
    pub explanation: String,
    pub rank: usize,
}

impl OptionView {
    pub fn build(option: &ResolutionOption, rank: usize) -> Self {
        Self {
            option_id: option.option_id.clone(),
            conflict_id: option.conflict_id.clone(),
            strategy: option.strategy,
            feasible: !option.is_sentinel(),
            actions: option.actions.clone(),
            impact: option.impact.clone(),
            cost_bearer: option.cost_bearer,
            explanation: option.explanation.clone(),
            rank,
        }
    }
}

// ==========================================
// 采纳结果
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationOutcome {
    pub record_id: String,
    pub conflict_id: String,
    pub option_id: String,
    pub strategy: ResolutionStrategy,
    pub actions_applied: usize,
    pub accepted_at: NaiveDateTime,
    pub tick: u64,
    /// 采纳记录是否已写入履历（写入失败不回滚调度动作）
    pub logged: bool,
}

impl ImplementationOutcome {
    pub fn build(record: &ResolutionRecord, logged: bool) -> Self {
        Self {
            record_id: record.record_id.clone(),
            conflict_id: record.conflict_id.clone(),
            option_id: record.option_id.clone(),
            strategy: record.strategy,
            actions_applied: record.actions.len(),
            accepted_at: record.accepted_at,
            tick: record.tick,
            logged,
        }
    }
}

// ==========================================
// 快照信息
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    pub tick: u64,
    pub clock: NaiveDateTime,
    pub revision: u64,
    pub pruned: usize,
}
