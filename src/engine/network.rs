// ==========================================
// 铁路区段调度系统 - 线路拓扑模型
// ==========================================
// 职责: 由线路定义构建只读有向图（节点=车站/线路所，边=区段）
// 红线: 加载后不可变，作为值类型被其他组件只读共享
// ==========================================

use crate::domain::network::NetworkDefinition;
use crate::domain::types::{NodeId, NodeKind, SectionId, SectionKind};
use crate::engine::error::{DispatchError, DispatchResult};
use chrono::Duration;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionInfo {
    pub id: SectionId,
    pub from: NodeId,
    pub to: NodeId,
    pub kind: SectionKind,
    pub capacity: u32,
    pub length_km: f64,
    pub line_speed_kmh: f64,
}

// ==========================================
// TrackNetwork - 线路拓扑
// ==========================================
#[derive(Debug, Clone)]
pub struct TrackNetwork {
    graph: DiGraph<NodeInfo, SectionId>,
    node_index: HashMap<NodeId, NodeIndex>,
    sections: BTreeMap<SectionId, SectionInfo>,
    section_edges: HashMap<SectionId, EdgeIndex>,
}

impl TrackNetwork {
    /// 加载线路定义
    ///
    /// # 错误
    /// - 引用未定义节点、容量为 0、ID 重复、限速非正、长度为负、定义为空
    ///   均返回 `InvalidTopology`
    pub fn load(definition: &NetworkDefinition) -> DispatchResult<Self> {
        if definition.nodes.is_empty() || definition.sections.is_empty() {
            return Err(DispatchError::InvalidTopology(
                "线路定义为空（至少需要一个节点和一个区段）".to_string(),
            ));
        }

        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();

        for node in &definition.nodes {
            if node.id.trim().is_empty() {
                return Err(DispatchError::InvalidTopology("节点 ID 不能为空".to_string()));
            }
            if node_index.contains_key(&node.id) {
                return Err(DispatchError::InvalidTopology(format!(
                    "节点 ID 重复: {}",
                    node.id
                )));
            }
            let idx = graph.add_node(NodeInfo {
                id: node.id.clone(),
                name: node.name.clone(),
                kind: node.kind,
                lat: node.lat,
                lng: node.lng,
            });
            node_index.insert(node.id.clone(), idx);
        }

        let mut sections = BTreeMap::new();
        let mut section_edges = HashMap::new();

        for section in &definition.sections {
            if sections.contains_key(&section.id) {
                return Err(DispatchError::InvalidTopology(format!(
                    "区段 ID 重复: {}",
                    section.id
                )));
            }
            let from = *node_index.get(&section.from).ok_or_else(|| {
                DispatchError::InvalidTopology(format!(
                    "区段 {} 引用了未定义节点 {}",
                    section.id, section.from
                ))
            })?;
            let to = *node_index.get(&section.to).ok_or_else(|| {
                DispatchError::InvalidTopology(format!(
                    "区段 {} 引用了未定义节点 {}",
                    section.id, section.to
                ))
            })?;
            if section.capacity == 0 {
                return Err(DispatchError::InvalidTopology(format!(
                    "区段 {} 容量为 0",
                    section.id
                )));
            }
            if !(section.line_speed_kmh > 0.0) {
                return Err(DispatchError::InvalidTopology(format!(
                    "区段 {} 限速必须为正: {}",
                    section.id, section.line_speed_kmh
                )));
            }
            if !(section.length_km >= 0.0) {
                return Err(DispatchError::InvalidTopology(format!(
                    "区段 {} 长度不能为负: {}",
                    section.id, section.length_km
                )));
            }

            let edge = graph.add_edge(from, to, section.id.clone());
            section_edges.insert(section.id.clone(), edge);
            sections.insert(
                section.id.clone(),
                SectionInfo {
                    id: section.id.clone(),
                    from: section.from.clone(),
                    to: section.to.clone(),
                    kind: section.kind,
                    capacity: section.capacity,
                    length_km: section.length_km,
                    line_speed_kmh: section.line_speed_kmh,
                },
            );
        }

        tracing::info!(
            "线路拓扑加载完成: nodes={}, sections={}",
            graph.node_count(),
            sections.len()
        );

        Ok(Self {
            graph,
            node_index,
            sections,
            section_edges,
        })
    }

    // ==========================================
    // 查询接口
    // ==========================================

    pub fn capacity(&self, section_id: &str) -> Option<u32> {
        self.sections.get(section_id).map(|s| s.capacity)
    }

    /// 相邻区段：从本区段终点节点出发的其他区段
    pub fn adjacent(&self, section_id: &str) -> BTreeSet<SectionId> {
        let Some(edge) = self.section_edges.get(section_id) else {
            return BTreeSet::new();
        };
        let Some((_, to)) = self.graph.edge_endpoints(*edge) else {
            return BTreeSet::new();
        };
        self.graph
            .edges(to)
            .filter(|e| e.id() != *edge)
            .map(|e| e.weight().clone())
            .collect()
    }

    pub fn section(&self, section_id: &str) -> Option<&SectionInfo> {
        self.sections.get(section_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeInfo> {
        self.node_index
            .get(node_id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    pub fn sections(&self) -> impl Iterator<Item = &SectionInfo> {
        self.sections.values()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// 最小运行时分（按列车最高速度与线路限速取小，向上取整到秒）
    pub fn min_running_time(&self, section_id: &str, train_max_speed_kmh: f64) -> Option<Duration> {
        let section = self.sections.get(section_id)?;
        let speed = section.line_speed_kmh.min(train_max_speed_kmh);
        if !(speed > 0.0) {
            return None;
        }
        let secs = (section.length_km * 3600.0 / speed - 1e-9).ceil().max(0.0) as i64;
        Some(Duration::seconds(secs))
    }

    /// 区段序列首尾相接
    pub fn is_contiguous(&self, path: &[SectionId]) -> bool {
        path.windows(2).all(|pair| {
            match (self.sections.get(&pair[0]), self.sections.get(&pair[1])) {
                (Some(a), Some(b)) => a.to == b.from,
                _ => false,
            }
        }) && path.iter().all(|id| self.sections.contains_key(id))
    }

    pub fn path_length_km(&self, path: &[SectionId]) -> Option<f64> {
        path.iter()
            .map(|id| self.sections.get(id).map(|s| s.length_km))
            .sum()
    }

    /// 路径起止节点
    pub fn path_endpoints(&self, path: &[SectionId]) -> Option<(NodeId, NodeId)> {
        let first = self.sections.get(path.first()?)?;
        let last = self.sections.get(path.last()?)?;
        Some((first.from.clone(), last.to.clone()))
    }

    // ==========================================
    // 迂回径路搜索
    // ==========================================

    /// 绕开指定区段、连接其起止节点的迂回径路
    ///
    /// 站台组（自环）只返回同站的其他站台组
    pub fn alternate_paths(&self, section_id: &str, max_hops: usize) -> Vec<Vec<SectionId>> {
        let Some(section) = self.sections.get(section_id) else {
            return Vec::new();
        };
        let avoid: BTreeSet<SectionId> = [section_id.to_string()].into_iter().collect();
        self.paths_between(&section.from, &section.to, &avoid, max_hops)
    }

    /// 节点间的简单径路（边级别，支持平行区段），按长度与 ID 排序
    pub fn paths_between(
        &self,
        from: &str,
        to: &str,
        avoid: &BTreeSet<SectionId>,
        max_hops: usize,
    ) -> Vec<Vec<SectionId>> {
        let (Some(&start), Some(&goal)) = (self.node_index.get(from), self.node_index.get(to))
        else {
            return Vec::new();
        };

        let mut results = Vec::new();

        if start == goal {
            for edge in self.graph.edges(start) {
                if edge.target() == goal && !avoid.contains(edge.weight()) {
                    results.push(vec![edge.weight().clone()]);
                }
            }
        } else if max_hops > 0 {
            let mut visited = HashSet::new();
            visited.insert(start);
            let mut path = Vec::new();
            self.dfs_paths(start, goal, avoid, max_hops, &mut visited, &mut path, &mut results);
        }

        results.sort_by(|a, b| {
            let la = self.path_length_km(a).unwrap_or(f64::MAX);
            let lb = self.path_length_km(b).unwrap_or(f64::MAX);
            la.total_cmp(&lb).then_with(|| a.cmp(b))
        });
        results
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_paths(
        &self,
        current: NodeIndex,
        goal: NodeIndex,
        avoid: &BTreeSet<SectionId>,
        hops_left: usize,
        visited: &mut HashSet<NodeIndex>,
        path: &mut Vec<SectionId>,
        results: &mut Vec<Vec<SectionId>>,
    ) {
        if hops_left == 0 {
            return;
        }
        for edge in self.graph.edges(current) {
            let section_id = edge.weight();
            let next = edge.target();
            if avoid.contains(section_id) || next == current {
                continue;
            }
            if next == goal {
                let mut found = path.clone();
                found.push(section_id.clone());
                results.push(found);
                continue;
            }
            if visited.contains(&next) {
                continue;
            }
            visited.insert(next);
            path.push(section_id.clone());
            self.dfs_paths(next, goal, avoid, hops_left - 1, visited, path, results);
            path.pop();
            visited.remove(&next);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::network::{NodeDefinition, SectionDefinition};

    fn node(id: &str, kind: NodeKind) -> NodeDefinition {
        NodeDefinition {
            id: id.to_string(),
            name: id.to_string(),
            kind,
            lat: 0.0,
            lng: 0.0,
        }
    }

    fn section(id: &str, from: &str, to: &str, kind: SectionKind, cap: u32, len: f64) -> SectionDefinition {
        SectionDefinition {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            kind,
            capacity: cap,
            length_km: len,
            line_speed_kmh: 120.0,
        }
    }

    /// A ──MAIN──▶ B，另有 A ─L1─▶ J ─L2─▶ B 迂回线；B 站两组站台
    pub(crate) fn loop_definition() -> NetworkDefinition {
        NetworkDefinition {
            nodes: vec![
                node("A", NodeKind::Station),
                node("J", NodeKind::Junction),
                node("B", NodeKind::Station),
            ],
            sections: vec![
                section("MAIN", "A", "B", SectionKind::Block, 1, 10.0),
                section("L1", "A", "J", SectionKind::Block, 1, 6.0),
                section("L2", "J", "B", SectionKind::Block, 1, 6.0),
                section("B_P1", "B", "B", SectionKind::Platform, 2, 0.5),
                section("B_P2", "B", "B", SectionKind::Platform, 1, 0.5),
            ],
        }
    }

    #[test]
    fn test_load_and_query() {
        let network = TrackNetwork::load(&loop_definition()).unwrap();
        assert_eq!(network.node_count(), 3);
        assert_eq!(network.section_count(), 5);
        assert_eq!(network.capacity("MAIN"), Some(1));
        assert_eq!(network.capacity("B_P1"), Some(2));
        assert_eq!(network.capacity("NOPE"), None);

        let adj = network.adjacent("MAIN");
        assert!(adj.contains("B_P1"));
        assert!(adj.contains("B_P2"));
        assert!(!adj.contains("MAIN"));
    }

    #[test]
    fn test_undefined_node_rejected() {
        let mut def = loop_definition();
        def.sections.push(section("X", "A", "Z", SectionKind::Block, 1, 1.0));
        let err = TrackNetwork::load(&def).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTopology(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut def = loop_definition();
        def.sections[0].capacity = 0;
        assert!(matches!(
            TrackNetwork::load(&def),
            Err(DispatchError::InvalidTopology(_))
        ));
    }

    #[test]
    fn test_duplicate_section_rejected() {
        let mut def = loop_definition();
        def.sections.push(section("MAIN", "A", "B", SectionKind::Block, 1, 1.0));
        assert!(TrackNetwork::load(&def).is_err());
    }

    #[test]
    fn test_alternate_paths_avoid_section() {
        let network = TrackNetwork::load(&loop_definition()).unwrap();
        let alts = network.alternate_paths("MAIN", 4);
        assert_eq!(alts, vec![vec!["L1".to_string(), "L2".to_string()]]);

        let platform_alts = network.alternate_paths("B_P1", 4);
        assert_eq!(platform_alts, vec![vec!["B_P2".to_string()]]);
    }

    #[test]
    fn test_min_running_time_uses_slower_limit() {
        let network = TrackNetwork::load(&loop_definition()).unwrap();
        // 10km @ min(120, 60) = 10 分钟
        assert_eq!(
            network.min_running_time("MAIN", 60.0),
            Some(Duration::minutes(10))
        );
        // 10km @ 120 = 5 分钟
        assert_eq!(
            network.min_running_time("MAIN", 200.0),
            Some(Duration::minutes(5))
        );
    }

    #[test]
    fn test_contiguity() {
        let network = TrackNetwork::load(&loop_definition()).unwrap();
        assert!(network.is_contiguous(&["L1".to_string(), "L2".to_string()]));
        assert!(network.is_contiguous(&["MAIN".to_string(), "B_P1".to_string()]));
        assert!(!network.is_contiguous(&["L2".to_string(), "L1".to_string()]));
    }
}
