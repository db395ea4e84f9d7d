// ==========================================
// 铁路区段调度系统 - 疏解方案领域模型
// ==========================================
// 职责: 候选方案（ResolutionOption）、影响摘要、采纳记录
// 红线: 影响字段由 what-if 推演计算得出，不得估猜
// ==========================================

use crate::domain::train::TrainAction;
use crate::domain::types::{ConflictId, OptionId, ResolutionStrategy, TrainClass};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// OptionImpact - 方案影响摘要
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionImpact {
    /// 全网终到报告晚点变化（分钟，正值表示变差）
    pub delay_delta_minutes: f64,
    /// 瞭望窗口内区段出清次数变化
    pub throughput_delta: i64,
    /// 受动作影响的列车数
    pub trains_affected: usize,
    /// 推演后目标冲突是否消除
    pub resolves_conflict: bool,
    /// 推演后新增的次生冲突数
    pub secondary_conflicts: usize,
    /// 改路附加运行时分（分钟，仅改路方案）
    pub extra_running_minutes: f64,
}

// ==========================================
// ResolutionOption - 候选疏解方案
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOption {
    pub option_id: OptionId,
    pub conflict_id: ConflictId,
    pub strategy: ResolutionStrategy,
    pub actions: Vec<TrainAction>,
    pub impact: OptionImpact,
    /// 承担代价的列车等级（用于排序 tie-break）
    pub cost_bearer: Option<TrainClass>,
    pub explanation: String,
    /// 计算所基于的 Tracker 版本号
    pub computed_at_revision: u64,
}

impl ResolutionOption {
    pub fn is_sentinel(&self) -> bool {
        self.strategy == ResolutionStrategy::NoFeasibleOption
    }

    /// 无可行方案的哨兵
    pub fn no_feasible(conflict_id: &str, reason: &str, revision: u64) -> Self {
        Self {
            option_id: format!("{}-none", conflict_id),
            conflict_id: conflict_id.to_string(),
            strategy: ResolutionStrategy::NoFeasibleOption,
            actions: Vec::new(),
            impact: OptionImpact::default(),
            cost_bearer: None,
            explanation: format!("无可行疏解方案: {}", reason),
            computed_at_revision: revision,
        }
    }
}

// ==========================================
// ResolutionRecord - 方案采纳记录（不可变历史）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub record_id: String,
    pub conflict_id: ConflictId,
    pub option_id: OptionId,
    pub strategy: ResolutionStrategy,
    pub section_id: String,
    pub actions: Vec<TrainAction>,
    pub impact: OptionImpact,
    pub explanation: String,
    pub accepted_at: NaiveDateTime,
    pub tick: u64,
    pub actor: String,
}
