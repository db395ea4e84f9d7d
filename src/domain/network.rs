// ==========================================
// 铁路区段调度系统 - 线路定义（加载输入）
// ==========================================
// 职责: 车站/线路所/区段的声明式定义，供 TrackNetwork::load 使用
// 说明: 站台组表示为起止节点相同的区段（自环）
// ==========================================

use crate::domain::types::{NodeId, NodeKind, SectionId, SectionKind};
use serde::{Deserialize, Serialize};

/// 车站或线路所
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
}

/// 闭塞分区或站台组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDefinition {
    pub id: SectionId,
    pub from: NodeId,
    pub to: NodeId,
    pub kind: SectionKind,
    /// 同时占用上限（闭塞分区通常为 1）
    pub capacity: u32,
    pub length_km: f64,
    pub line_speed_kmh: f64,
}

/// 整个调度区段的线路定义
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkDefinition {
    pub nodes: Vec<NodeDefinition>,
    pub sections: Vec<SectionDefinition>,
}

impl NetworkDefinition {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
