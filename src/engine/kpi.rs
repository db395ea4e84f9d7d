// ==========================================
// 铁路区段调度系统 - 运行指标汇总
// ==========================================
// 职责: 路网状态、冲突统计、冲突模式分析
// 红线: 只读快照与冲突登记表，不修改任何状态
// ==========================================

use crate::domain::conflict::ConflictRecord;
use crate::domain::types::{
    duration_minutes, SectionId, SeverityLevel, TrainClass, TrainId, TrainStatus,
};
use crate::engine::detector::{find_contentions, ConflictRegistry, DetectionParams};
use crate::engine::tracker::{TrackerSnapshot, TrainProjection};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 热点区段最多列出的个数
pub const HOTSPOT_LIMIT: usize = 5;
/// 冲突统计中"最常见区段"列出的个数
pub const COMMON_SECTION_LIMIT: usize = 3;

// ==========================================
// 路网状态
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainStatusEntry {
    pub train_id: TrainId,
    pub name: String,
    pub class: TrainClass,
    pub status: TrainStatus,
    pub delay_minutes: f64,
    pub section_id: Option<SectionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub clock: NaiveDateTime,
    pub total_active_trains: usize,
    pub on_time_trains: usize,
    pub slight_delay_trains: usize,
    pub delayed_trains: usize,
    pub avg_delay_minutes: f64,
    /// 正点率（%）；无列车时为 0
    pub network_efficiency: f64,
    pub completed_trains: u64,
    pub trains: Vec<TrainStatusEntry>,
}

/// 按报告晚点（最近一次分界点晚点，截断为 ≥0）统计路网状态
pub fn network_status(
    snapshot: &TrackerSnapshot,
    slight_threshold_minutes: f64,
    completed_trains: u64,
) -> NetworkStatus {
    let trains: Vec<TrainStatusEntry> = snapshot
        .trains()
        .map(|train| {
            let delay_minutes = train.reported_delay_minutes();
            TrainStatusEntry {
                train_id: train.id.clone(),
                name: train.name.clone(),
                class: train.class,
                status: TrainStatus::from_delay(delay_minutes, slight_threshold_minutes),
                delay_minutes: round1(delay_minutes),
                section_id: train.current_section().cloned(),
            }
        })
        .collect();

    let count = |status: TrainStatus| trains.iter().filter(|t| t.status == status).count();
    let total = trains.len();
    let on_time = count(TrainStatus::OnTime);
    let total_delay: f64 = snapshot.trains().map(|t| t.reported_delay_minutes()).sum();

    NetworkStatus {
        clock: snapshot.clock(),
        total_active_trains: total,
        on_time_trains: on_time,
        slight_delay_trains: count(TrainStatus::SlightDelay),
        delayed_trains: count(TrainStatus::Delayed),
        avg_delay_minutes: if total > 0 {
            round1(total_delay / total as f64)
        } else {
            0.0
        },
        network_efficiency: if total > 0 {
            round1(on_time as f64 * 100.0 / total as f64)
        } else {
            0.0
        },
        completed_trains,
        trains,
    }
}

// ==========================================
// 冲突统计（仅活动冲突）
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictStatistics {
    pub total_active_conflicts: usize,
    pub critical_conflicts: usize,
    pub high_conflicts: usize,
    pub medium_conflicts: usize,
    pub low_conflicts: usize,
    /// 平均潜在晚点（分钟）：后车为让出区段至少需等待的时长
    pub average_potential_delay: f64,
    pub most_common_sections: Vec<SectionId>,
}

/// 潜在晚点：后车须等到前车出清才能进入
pub fn potential_delay_minutes(record: &ConflictRecord) -> f64 {
    let c = &record.contention;
    duration_minutes(c.leader.exit - c.follower.entry).max(0.0)
}

pub fn conflict_statistics(registry: &ConflictRegistry) -> ConflictStatistics {
    let active: Vec<&ConflictRecord> = registry.active().collect();
    let level = |lv: SeverityLevel| {
        active
            .iter()
            .filter(|r| r.contention.severity.level == lv)
            .count()
    };
    let average_potential_delay = if active.is_empty() {
        0.0
    } else {
        round1(active.iter().map(|r| potential_delay_minutes(r)).sum::<f64>() / active.len() as f64)
    };

    ConflictStatistics {
        total_active_conflicts: active.len(),
        critical_conflicts: level(SeverityLevel::Critical),
        high_conflicts: level(SeverityLevel::High),
        medium_conflicts: level(SeverityLevel::Medium),
        low_conflicts: level(SeverityLevel::Low),
        average_potential_delay,
        most_common_sections: ranked_counts(
            active.iter().map(|r| r.contention.section_id.clone()),
        )
        .into_iter()
        .take(COMMON_SECTION_LIMIT)
        .map(|(section, _)| section)
        .collect(),
    }
}

// ==========================================
// 冲突模式分析（全部历史）
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictPatterns {
    pub total_conflicts_detected: usize,
    pub total_conflicts_resolved: usize,
    pub total_conflicts_expired: usize,
    pub hotspot_sections: Vec<(SectionId, usize)>,
    /// 按区段类型（block/platform）计数
    pub by_section_kind: Vec<(String, usize)>,
    pub scans: u64,
}

pub fn conflict_patterns(registry: &ConflictRegistry) -> ConflictPatterns {
    let tallies = registry.tallies();
    let mut hotspot_sections = rank_counts(tallies.by_section.clone());
    hotspot_sections.truncate(HOTSPOT_LIMIT);

    ConflictPatterns {
        total_conflicts_detected: tallies.detected,
        total_conflicts_resolved: tallies.resolved,
        total_conflicts_expired: tallies.expired,
        hotspot_sections,
        by_section_kind: rank_counts(tallies.by_section_kind.clone()),
        scans: registry.scans(),
    }
}

// ==========================================
// What-if 对比（不提交）
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhatIfSide {
    /// 推演终到晚点合计（分钟，单车截断为 ≥0）
    pub projected_delay_minutes: f64,
    pub delayed_trains: usize,
    pub conflicts: usize,
    /// 瞭望窗口内的区段出清次数
    pub clearances: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhatIfReport {
    pub base_revision: u64,
    pub before: WhatIfSide,
    pub after: WhatIfSide,
    pub trains_affected: usize,
}

pub fn what_if_summary(
    before: &TrackerSnapshot,
    after: &TrackerSnapshot,
    params: &DetectionParams,
) -> WhatIfReport {
    let before_proj = before.project_all();
    let after_proj = after.project_all();
    let trains_affected = after_proj
        .iter()
        .filter(|p| !before_proj.iter().any(|q| q == *p))
        .count();

    WhatIfReport {
        base_revision: before.revision(),
        before: what_if_side(before, &before_proj, params),
        after: what_if_side(after, &after_proj, params),
        trains_affected,
    }
}

fn what_if_side(
    snapshot: &TrackerSnapshot,
    projections: &[TrainProjection],
    params: &DetectionParams,
) -> WhatIfSide {
    let until = snapshot.clock() + params.horizon;
    let delays: Vec<f64> = projections
        .iter()
        .map(|p| duration_minutes(p.final_delay()).max(0.0))
        .collect();
    WhatIfSide {
        projected_delay_minutes: round1(delays.iter().sum()),
        delayed_trains: delays.iter().filter(|d| **d > 0.0).count(),
        conflicts: find_contentions(snapshot, params).len(),
        clearances: projections.iter().map(|p| p.clearances_before(until)).sum(),
    }
}

/// 计数后按次数降序、键升序排列
fn ranked_counts(keys: impl Iterator<Item = String>) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    rank_counts(counts)
}

fn rank_counts(counts: BTreeMap<String, usize>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
