// ==========================================
// 铁路区段调度系统 - 冲突领域模型
// ==========================================
// 职责: 资源争用（Contention）与冲突记录（ConflictRecord）
// 说明: Contention 是单次扫描的纯计算结果；ConflictRecord 带生命周期
// ==========================================

use crate::domain::types::{
    ConflictId, ConflictStatus, OptionId, SectionId, SectionKind, SeverityLevel, TrainClass,
    TrainId,
};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// 冲突中一方列车在该区段的预测占用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictParty {
    pub train_id: TrainId,
    pub class: TrainClass,
    /// 在该区段上的有效次序优先级
    pub priority: u8,
    pub entry: NaiveDateTime,
    pub exit: NaiveDateTime,
    /// 扫描时是否已经在该区段内
    pub inside: bool,
}

/// 严重度（评分 + 等级）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Severity {
    pub score: f64,
    pub level: SeverityLevel,
}

/// 冲突唯一键：区段 + 列车对（按 ID 排序）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConflictKey {
    pub section_id: SectionId,
    pub train_a: TrainId,
    pub train_b: TrainId,
}

impl ConflictKey {
    pub fn new(section_id: &str, t1: &str, t2: &str) -> Self {
        let (a, b) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        Self {
            section_id: section_id.to_string(),
            train_a: a.to_string(),
            train_b: b.to_string(),
        }
    }
}

// ==========================================
// Contention - 单次扫描检出的资源争用
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contention {
    pub section_id: SectionId,
    pub section_kind: SectionKind,
    pub capacity: u32,
    /// 先进入区段的一方
    pub leader: ConflictParty,
    /// 后进入区段的一方
    pub follower: ConflictParty,
    pub overlap_start: NaiveDateTime,
    pub overlap_end: NaiveDateTime,
    pub time_to_entry_secs: i64,
    pub severity: Severity,
}

impl Contention {
    pub fn key(&self) -> ConflictKey {
        ConflictKey::new(
            &self.section_id,
            &self.leader.train_id,
            &self.follower.train_id,
        )
    }

    pub fn overlap(&self) -> Duration {
        self.overlap_end - self.overlap_start
    }

    pub fn involves(&self, train_id: &str) -> bool {
        self.leader.train_id == train_id || self.follower.train_id == train_id
    }

    /// 两车中较高的等级优先级
    pub fn top_class_priority(&self) -> u8 {
        self.leader
            .class
            .base_priority()
            .max(self.follower.class.base_priority())
    }
}

// ==========================================
// ConflictRecord - 冲突记录（带生命周期）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub conflict_id: ConflictId,
    pub contention: Contention,
    pub status: ConflictStatus,
    pub detected_at: NaiveDateTime,
    pub detected_scan: u64,
    pub last_seen_scan: u64,
    /// 连续未复现的扫描次数
    pub missed_scans: u32,
    pub resolved_at: Option<NaiveDateTime>,
    pub resolved_by: Option<OptionId>,
    pub expired_at: Option<NaiveDateTime>,
}

impl ConflictRecord {
    pub fn is_active(&self) -> bool {
        self.status == ConflictStatus::Active
    }

    pub fn key(&self) -> ConflictKey {
        self.contention.key()
    }
}
