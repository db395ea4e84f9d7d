// ==========================================
// 铁路区段调度系统 - 列车领域模型
// ==========================================
// 职责: 列车、运行图计划（行程段）、调度动作
// 红线: 列车状态只由 Tracker.advance 与已采纳动作修改
// ==========================================

use crate::domain::types::{duration_minutes, serde_secs, SectionId, TrainClass, TrainId};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// ItineraryLeg - 行程段
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItineraryLeg {
    pub section_id: SectionId,
    pub scheduled_entry: NaiveDateTime,
    pub scheduled_exit: NaiveDateTime,
    /// 出清本段前追加的扣车时长
    #[serde(with = "serde_secs", default = "Duration::zero")]
    pub hold: Duration,
    /// 动用图定缓冲提前出清的时长（≥0）
    #[serde(with = "serde_secs", default = "Duration::zero")]
    pub expedite: Duration,
    #[serde(default)]
    pub actual_entry: Option<NaiveDateTime>,
    #[serde(default)]
    pub actual_exit: Option<NaiveDateTime>,
}

impl ItineraryLeg {
    pub fn new(
        section_id: impl Into<SectionId>,
        scheduled_entry: NaiveDateTime,
        scheduled_exit: NaiveDateTime,
    ) -> Self {
        Self {
            section_id: section_id.into(),
            scheduled_entry,
            scheduled_exit,
            hold: Duration::zero(),
            expedite: Duration::zero(),
            actual_entry: None,
            actual_exit: None,
        }
    }

    /// 出清目标时刻（图定出清 - 提前量）
    pub fn exit_target(&self) -> NaiveDateTime {
        self.scheduled_exit - self.expedite
    }

    pub fn scheduled_duration(&self) -> Duration {
        self.scheduled_exit - self.scheduled_entry
    }
}

// ==========================================
// TrainPosition - 列车位置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrainPosition {
    /// 尚未发车
    NotStarted,
    /// 正在占用第 leg_index 个行程段
    InSection { leg_index: usize, progress_km: f64 },
    /// 行程已完成
    Completed,
}

// ==========================================
// Train - 列车
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Train {
    pub id: TrainId,
    pub name: String,
    pub class: TrainClass,
    pub max_speed_kmh: f64,
    /// 当前生效的行程（可被改路）
    pub itinerary: Vec<ItineraryLeg>,
    /// 初始图定行程（只读，用于改路回原径路）
    pub timetable: Vec<ItineraryLeg>,
    pub position: TrainPosition,
    /// 发车前扣车
    #[serde(with = "serde_secs", default = "Duration::zero")]
    pub departure_hold: Duration,
    /// 最近一次出清分界点的晚点（可为负，表示早点）
    #[serde(with = "serde_secs", default = "Duration::zero")]
    pub last_boundary_delay: Duration,
    /// 区段内次序优先级覆写（重排次序）
    #[serde(default)]
    pub precedence: BTreeMap<SectionId, u8>,
    pub updated_at: NaiveDateTime,
}

impl Train {
    pub fn new(
        id: impl Into<TrainId>,
        name: impl Into<String>,
        class: TrainClass,
        max_speed_kmh: f64,
        itinerary: Vec<ItineraryLeg>,
    ) -> Self {
        let updated_at = itinerary
            .first()
            .map(|leg| leg.scheduled_entry)
            .unwrap_or_default();
        Self {
            id: id.into(),
            name: name.into(),
            class,
            max_speed_kmh,
            timetable: itinerary.clone(),
            itinerary,
            position: TrainPosition::NotStarted,
            departure_hold: Duration::zero(),
            last_boundary_delay: Duration::zero(),
            precedence: BTreeMap::new(),
            updated_at,
        }
    }

    /// 当前行程段下标（未发车/已完成时为 None）
    pub fn current_leg_index(&self) -> Option<usize> {
        match self.position {
            TrainPosition::InSection { leg_index, .. } => Some(leg_index),
            _ => None,
        }
    }

    pub fn current_section(&self) -> Option<&SectionId> {
        self.current_leg_index()
            .and_then(|idx| self.itinerary.get(idx))
            .map(|leg| &leg.section_id)
    }

    pub fn is_started(&self) -> bool {
        !matches!(self.position, TrainPosition::NotStarted)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.position, TrainPosition::Completed)
    }

    /// 第一个尚未出清的行程段下标
    pub fn first_pending_leg(&self) -> usize {
        match self.position {
            TrainPosition::NotStarted => 0,
            TrainPosition::InSection { leg_index, .. } => leg_index,
            TrainPosition::Completed => self.itinerary.len(),
        }
    }

    /// 在行程中查找区段（只看尚未出清的段）
    pub fn find_pending_leg(&self, section_id: &str) -> Option<usize> {
        let start = self.first_pending_leg();
        self.itinerary
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, leg)| leg.section_id == section_id)
            .map(|(idx, _)| idx)
    }

    /// 在某区段上的有效次序优先级（重排覆写优先于等级）
    pub fn effective_priority(&self, section_id: &str) -> u8 {
        self.precedence
            .get(section_id)
            .copied()
            .unwrap_or_else(|| self.class.base_priority())
    }

    /// 报告口径晚点（分钟，截断为 ≥0）
    pub fn reported_delay_minutes(&self) -> f64 {
        duration_minutes(self.last_boundary_delay).max(0.0)
    }

    /// 尚未出清的区段序列（含当前区段）
    pub fn remaining_sections(&self) -> Vec<SectionId> {
        self.itinerary
            .iter()
            .skip(self.first_pending_leg())
            .map(|leg| leg.section_id.clone())
            .collect()
    }
}

// ==========================================
// TrainAction - 调度动作
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    /// 扣车：在进入 before_section 前停留（None 表示当前区段/始发站）
    Hold {
        before_section: Option<SectionId>,
        #[serde(with = "serde_secs")]
        duration: Duration,
    },
    /// 改路：将后续行程中连续的 replace 段替换为 via 段
    Reroute {
        replace: Vec<SectionId>,
        via: Vec<SectionId>,
    },
    /// 重排次序：调整在共用区段上的次序优先级，不改变行程
    Resequence { section_id: SectionId, precedence: u8 },
    /// 动用图定缓冲，提前出清 section_id
    Expedite {
        section_id: SectionId,
        #[serde(with = "serde_secs")]
        by: Duration,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Hold { .. } => "hold",
            ActionKind::Reroute { .. } => "reroute",
            ActionKind::Resequence { .. } => "resequence",
            ActionKind::Expedite { .. } => "expedite",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainAction {
    pub train_id: TrainId,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl TrainAction {
    pub fn hold(train_id: &str, before_section: Option<&str>, duration: Duration) -> Self {
        Self {
            train_id: train_id.to_string(),
            kind: ActionKind::Hold {
                before_section: before_section.map(|s| s.to_string()),
                duration,
            },
        }
    }

    pub fn reroute(train_id: &str, replace: Vec<SectionId>, via: Vec<SectionId>) -> Self {
        Self {
            train_id: train_id.to_string(),
            kind: ActionKind::Reroute { replace, via },
        }
    }

    pub fn resequence(train_id: &str, section_id: &str, precedence: u8) -> Self {
        Self {
            train_id: train_id.to_string(),
            kind: ActionKind::Resequence {
                section_id: section_id.to_string(),
                precedence,
            },
        }
    }

    pub fn expedite(train_id: &str, section_id: &str, by: Duration) -> Self {
        Self {
            train_id: train_id.to_string(),
            kind: ActionKind::Expedite {
                section_id: section_id.to_string(),
                by,
            },
        }
    }

    /// 改路的逆动作
    pub fn inverse_reroute(&self) -> Option<Self> {
        match &self.kind {
            ActionKind::Reroute { replace, via } => Some(Self::reroute(
                &self.train_id,
                via.clone(),
                replace.clone(),
            )),
            _ => None,
        }
    }
}
