// ==========================================
// 铁路区段调度系统 - 领域类型定义
// ==========================================
// 职责: 列车等级、区段类型、冲突状态与严重度等枚举
// 红线: 列车等级(静态)与冲突严重度(计算值)是两个独立字段
// ==========================================

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type NodeId = String;
pub type SectionId = String;
pub type TrainId = String;
pub type ConflictId = String;
pub type OptionId = String;

// ==========================================
// 列车等级 (Train Class)
// ==========================================
// 决定基础优先级: Express > Passenger > Freight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrainClass {
    Express,
    Passenger,
    Freight,
}

impl TrainClass {
    /// 基础优先级（数值越大越优先）
    pub fn base_priority(&self) -> u8 {
        match self {
            TrainClass::Express => 3,
            TrainClass::Passenger => 2,
            TrainClass::Freight => 1,
        }
    }

    /// 晚点敏感度权重
    pub fn delay_sensitivity(&self) -> f64 {
        match self {
            TrainClass::Express => 3.0,
            TrainClass::Passenger => 2.0,
            TrainClass::Freight => 1.0,
        }
    }

    /// 晚点容忍度（敏感度的倒数，用于均衡扣车分摊）
    pub fn delay_tolerance(&self) -> f64 {
        1.0 / self.delay_sensitivity()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrainClass::Express => "Express",
            TrainClass::Passenger => "Passenger",
            TrainClass::Freight => "Freight",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "express" => Some(TrainClass::Express),
            "passenger" => Some(TrainClass::Passenger),
            "freight" => Some(TrainClass::Freight),
            _ => None,
        }
    }
}

impl fmt::Display for TrainClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 节点类型 / 区段类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Station,
    Junction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionKind {
    Block,    // 闭塞分区
    Platform, // 股道/站台组
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Block => "Block",
            SectionKind::Platform => "Platform",
        }
    }
}

// ==========================================
// 冲突生命周期 (Conflict Status)
// ==========================================
// Active → Resolved（采纳方案） / Active → Expired（连续 K 次扫描未复现）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStatus {
    Active,
    Resolved,
    Expired,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Active => "ACTIVE",
            ConflictStatus::Resolved => "RESOLVED",
            ConflictStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 冲突严重度等级
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
    Critical, // 冲突已在发生（time_to_entry = 0）
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeverityLevel::Low => write!(f, "low"),
            SeverityLevel::Medium => write!(f, "medium"),
            SeverityLevel::High => write!(f, "high"),
            SeverityLevel::Critical => write!(f, "critical"),
        }
    }
}

// ==========================================
// 列车运行状态（对外报告口径）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainStatus {
    OnTime,
    SlightDelay,
    Delayed,
}

impl TrainStatus {
    /// 按报告晚点（分钟, ≥0）与轻微晚点阈值判定
    pub fn from_delay(delay_minutes: f64, slight_threshold_minutes: f64) -> Self {
        if delay_minutes <= 0.0 {
            TrainStatus::OnTime
        } else if delay_minutes <= slight_threshold_minutes {
            TrainStatus::SlightDelay
        } else {
            TrainStatus::Delayed
        }
    }
}

// ==========================================
// 疏解策略
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    PriorityHold,
    BalancedHold,
    Reroute,
    NoFeasibleOption,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::PriorityHold => "PRIORITY_HOLD",
            ResolutionStrategy::BalancedHold => "BALANCED_HOLD",
            ResolutionStrategy::Reroute => "REROUTE",
            ResolutionStrategy::NoFeasibleOption => "NO_FEASIBLE_OPTION",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PRIORITY_HOLD" => ResolutionStrategy::PriorityHold,
            "BALANCED_HOLD" => ResolutionStrategy::BalancedHold,
            "REROUTE" => ResolutionStrategy::Reroute,
            _ => ResolutionStrategy::NoFeasibleOption,
        }
    }
}

// ==========================================
// 时长工具
// ==========================================

/// 时长折算为分钟（带小数）
pub fn duration_minutes(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 60_000.0
}

/// 分钟（带小数）折算为时长，精确到秒
pub fn minutes_duration(minutes: f64) -> Duration {
    Duration::seconds((minutes * 60.0).round() as i64)
}

/// chrono::Duration 按整秒序列化
pub mod serde_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Ok(Duration::seconds(secs))
    }
}
