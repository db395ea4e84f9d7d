// ==========================================
// 铁路区段调度系统 - 冲突检测器
// ==========================================
// 职责: 在瞭望窗口 H 内扫描区段占用，检出超容量的列车对并维护冲突生命周期
// 红线: 零漏报（时间粒度 1 秒）；检测结果只依赖推演，不含随机性
// ==========================================
// 判定: 重叠窗口非空 且 time_to_entry = max(0, 重叠开始 - now) ≤ R
// 严重度: 重叠分钟 × (1 + 紧迫度) + 0.5 × 等级差，紧迫度 = (R - tte) / R
// ==========================================

use crate::domain::conflict::{ConflictKey, ConflictParty, ConflictRecord, Contention, Severity};
use crate::domain::types::{
    duration_minutes, ConflictId, ConflictStatus, OptionId, SectionId, SeverityLevel,
};
use crate::engine::error::{DispatchError, DispatchResult};
use crate::engine::tracker::{TrackerSnapshot, TrainProjection};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

const HIGH_SCORE: f64 = 3.0;
const MEDIUM_SCORE: f64 = 1.0;
const PRIORITY_GAP_WEIGHT: f64 = 0.5;

// ==========================================
// 检测参数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    /// 瞭望窗口 H
    pub horizon: Duration,
    /// 响应阈值 R
    pub reaction_window: Duration,
    /// 连续 K 次未复现即过期
    pub expiry_scans: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            horizon: Duration::minutes(30),
            reaction_window: Duration::minutes(10),
            expiry_scans: 3,
        }
    }
}

// ==========================================
// 纯计算: 区段争用
// ==========================================

#[derive(Debug, Clone)]
struct Occupancy {
    party: ConflictParty,
}

/// 扫描快照中的全部区段争用（不修改任何状态）
pub fn find_contentions(snapshot: &TrackerSnapshot, params: &DetectionParams) -> Vec<Contention> {
    let projections = snapshot.project_all();
    contentions_from(snapshot, &projections, params)
}

pub(crate) fn contentions_from(
    snapshot: &TrackerSnapshot,
    projections: &[TrainProjection],
    params: &DetectionParams,
) -> Vec<Contention> {
    let now = snapshot.clock();
    let limit = now + params.horizon;
    let network = snapshot.network();

    let mut by_section: BTreeMap<SectionId, Vec<Occupancy>> = BTreeMap::new();
    for projection in projections {
        let Some(train) = snapshot.train(&projection.train_id) else {
            continue;
        };
        for leg in &projection.legs {
            if leg.entry >= limit || leg.exit <= leg.entry {
                continue;
            }
            by_section
                .entry(leg.section_id.clone())
                .or_default()
                .push(Occupancy {
                    party: ConflictParty {
                        train_id: train.id.clone(),
                        class: train.class,
                        priority: train.effective_priority(&leg.section_id),
                        entry: leg.entry,
                        exit: leg.exit,
                        inside: leg.inside,
                    },
                });
        }
    }

    let mut found = Vec::new();
    for (section_id, occupancies) in &by_section {
        let Some(section) = network.section(section_id) else {
            continue;
        };
        if occupancies.len() as u32 <= section.capacity {
            continue;
        }
        let pieces = over_capacity_pieces(occupancies, section.capacity);
        if pieces.is_empty() {
            continue;
        }

        for i in 0..occupancies.len() {
            for j in (i + 1)..occupancies.len() {
                let a = &occupancies[i].party;
                let b = &occupancies[j].party;
                if a.train_id == b.train_id {
                    continue;
                }
                let Some((start, end)) = pair_overlap(a, b, &pieces) else {
                    continue;
                };
                let tte = (start - now).max(Duration::zero());
                if tte > params.reaction_window {
                    continue;
                }
                let (leader, follower) = order_pair(a, b);
                let severity = compute_severity(end - start, tte, params.reaction_window, leader, follower);
                found.push(Contention {
                    section_id: section_id.clone(),
                    section_kind: section.kind,
                    capacity: section.capacity,
                    leader: leader.clone(),
                    follower: follower.clone(),
                    overlap_start: start,
                    overlap_end: end,
                    time_to_entry_secs: tte.num_seconds(),
                    severity,
                });
            }
        }
    }

    found.sort_by(|a, b| a.key().cmp(&b.key()).then(a.overlap_start.cmp(&b.overlap_start)));
    // 同一列车对在同一区段只保留最早的一次
    found.dedup_by(|later, earlier| later.key() == earlier.key());
    found
}

/// 扫描线：占用数超过容量的时段
fn over_capacity_pieces(
    occupancies: &[Occupancy],
    capacity: u32,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut events: Vec<(NaiveDateTime, i32)> = occupancies
        .iter()
        .flat_map(|o| [(o.party.entry, 1), (o.party.exit, -1)])
        .collect();
    // 半开区间：同一时刻先出后进
    events.sort();

    let mut pieces = Vec::new();
    let mut count: i64 = 0;
    let mut open: Option<NaiveDateTime> = None;
    for (at, delta) in events {
        count += delta as i64;
        if count > capacity as i64 {
            if open.is_none() {
                open = Some(at);
            }
        } else if let Some(start) = open.take() {
            if at > start {
                pieces.push((start, at));
            }
        }
    }
    pieces
}

/// 列车对交集内的超容量时段跨度
fn pair_overlap(
    a: &ConflictParty,
    b: &ConflictParty,
    pieces: &[(NaiveDateTime, NaiveDateTime)],
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let lo = a.entry.max(b.entry);
    let hi = a.exit.min(b.exit);
    if lo >= hi {
        return None;
    }
    let mut span: Option<(NaiveDateTime, NaiveDateTime)> = None;
    for (start, end) in pieces {
        let s = (*start).max(lo);
        let e = (*end).min(hi);
        if s < e {
            span = Some(match span {
                None => (s, e),
                Some((first, _)) => (first, e),
            });
        }
    }
    span
}

/// 先进入者为 leader；同时进入时优先级高者在前
fn order_pair<'a>(a: &'a ConflictParty, b: &'a ConflictParty) -> (&'a ConflictParty, &'a ConflictParty) {
    let a_first = a
        .entry
        .cmp(&b.entry)
        .then(b.priority.cmp(&a.priority))
        .then(a.train_id.cmp(&b.train_id))
        .is_le();
    if a_first {
        (a, b)
    } else {
        (b, a)
    }
}

pub(crate) fn compute_severity(
    overlap: Duration,
    time_to_entry: Duration,
    reaction_window: Duration,
    leader: &ConflictParty,
    follower: &ConflictParty,
) -> Severity {
    let window = reaction_window.num_milliseconds() as f64;
    let urgency = if window > 0.0 {
        ((window - time_to_entry.num_milliseconds() as f64) / window).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let priority_gap =
        (leader.class.base_priority() as f64 - follower.class.base_priority() as f64).abs();
    let score = duration_minutes(overlap) * (1.0 + urgency) + PRIORITY_GAP_WEIGHT * priority_gap;

    let level = if time_to_entry <= Duration::zero() {
        SeverityLevel::Critical
    } else if score >= HIGH_SCORE {
        SeverityLevel::High
    } else if score >= MEDIUM_SCORE {
        SeverityLevel::Medium
    } else {
        SeverityLevel::Low
    };
    Severity { score, level }
}

// ==========================================
// ConflictRegistry - 冲突记录仓（arena）
// ==========================================
// 活动冲突与归档分开存放：tick 复制状态时只复制活动集 + 有界归档
// 全量历史以计数形式保留（模式分析用），明细见疏解履历
// ==========================================

/// 归档保留的已疏解/已过期冲突条数
pub const ARCHIVE_LIMIT: usize = 256;

/// 冲突历史计数（不随归档淘汰而减少）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictTallies {
    pub detected: usize,
    pub resolved: usize,
    pub expired: usize,
    pub by_section: BTreeMap<SectionId, usize>,
    pub by_section_kind: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    records: Vec<ConflictRecord>,
    next_seq: u64,
    scans: u64,
    #[serde(default)]
    tallies: ConflictTallies,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "RegistryState", into = "RegistryState")]
pub struct ConflictRegistry {
    /// 仅 Active
    records: BTreeMap<ConflictId, ConflictRecord>,
    active: BTreeMap<ConflictKey, ConflictId>,
    /// 最近流转为 Resolved / Expired 的冲突，按流转先后排列
    archive: VecDeque<ConflictRecord>,
    tallies: ConflictTallies,
    next_seq: u64,
    scans: u64,
}

impl From<RegistryState> for ConflictRegistry {
    fn from(state: RegistryState) -> Self {
        let mut registry = ConflictRegistry {
            next_seq: state.next_seq,
            scans: state.scans,
            tallies: state.tallies,
            ..ConflictRegistry::default()
        };
        for record in state.records {
            if record.is_active() {
                registry.active.insert(record.key(), record.conflict_id.clone());
                registry.records.insert(record.conflict_id.clone(), record);
            } else {
                registry.push_archive(record);
            }
        }
        registry
    }
}

impl From<ConflictRegistry> for RegistryState {
    fn from(registry: ConflictRegistry) -> Self {
        RegistryState {
            records: registry
                .archive
                .into_iter()
                .chain(registry.records.into_values())
                .collect(),
            next_seq: registry.next_seq,
            scans: registry.scans,
            tallies: registry.tallies,
        }
    }
}

impl ConflictRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conflict_id: &str) -> Option<&ConflictRecord> {
        self.records
            .get(conflict_id)
            .or_else(|| self.archive.iter().rev().find(|r| r.conflict_id == conflict_id))
    }

    pub fn active(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.active.values().filter_map(|id| self.records.get(id))
    }

    /// 归档中的冲突（旧 → 新）
    pub fn archived(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.archive.iter()
    }

    pub fn tallies(&self) -> &ConflictTallies {
        &self.tallies
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn scans(&self) -> u64 {
        self.scans
    }

    pub fn find_active(&self, key: &ConflictKey) -> Option<&ConflictRecord> {
        self.active.get(key).and_then(|id| self.records.get(id))
    }

    fn allocate_id(&mut self) -> ConflictId {
        self.next_seq += 1;
        format!("CF-{:06}", self.next_seq)
    }

    /// 是否为本登记表签发过的冲突ID
    fn issued(&self, conflict_id: &str) -> bool {
        conflict_id
            .strip_prefix("CF-")
            .and_then(|seq| seq.parse::<u64>().ok())
            .map_or(false, |seq| seq >= 1 && seq <= self.next_seq)
    }

    fn push_archive(&mut self, record: ConflictRecord) {
        if self.archive.len() >= ARCHIVE_LIMIT {
            self.archive.pop_front();
        }
        self.archive.push_back(record);
    }

    /// 登记本次扫描的检出结果；返回 (冲突ID, 是否新建)
    fn observe(&mut self, contention: Contention, now: NaiveDateTime, scan: u64) -> (ConflictId, bool) {
        let key = contention.key();
        if let Some(id) = self.active.get(&key).cloned() {
            if let Some(record) = self.records.get_mut(&id) {
                record.contention = contention;
                record.last_seen_scan = scan;
                record.missed_scans = 0;
                return (id, false);
            }
        }

        let id = self.allocate_id();
        self.tallies.detected += 1;
        *self
            .tallies
            .by_section
            .entry(contention.section_id.clone())
            .or_default() += 1;
        *self
            .tallies
            .by_section_kind
            .entry(contention.section_kind.as_str().to_string())
            .or_default() += 1;
        self.records.insert(
            id.clone(),
            ConflictRecord {
                conflict_id: id.clone(),
                contention,
                status: ConflictStatus::Active,
                detected_at: now,
                detected_scan: scan,
                last_seen_scan: scan,
                missed_scans: 0,
                resolved_at: None,
                resolved_by: None,
                expired_at: None,
            },
        );
        self.active.insert(key, id.clone());
        (id, true)
    }

    /// 将活动冲突移入归档
    fn close(&mut self, conflict_id: &str, apply: impl FnOnce(&mut ConflictRecord)) -> DispatchResult<()> {
        self.ensure_active(conflict_id)?;
        let Some(mut record) = self.records.remove(conflict_id) else {
            return Err(DispatchError::UnknownConflict(conflict_id.to_string()));
        };
        self.active.remove(&record.key());
        apply(&mut record);
        self.push_archive(record);
        Ok(())
    }

    /// Active → Resolved
    pub fn resolve(
        &mut self,
        conflict_id: &str,
        option_id: &OptionId,
        now: NaiveDateTime,
    ) -> DispatchResult<()> {
        self.close(conflict_id, |record| {
            record.status = ConflictStatus::Resolved;
            record.resolved_at = Some(now);
            record.resolved_by = Some(option_id.clone());
        })?;
        self.tallies.resolved += 1;
        Ok(())
    }

    /// Active → Expired
    pub fn expire(&mut self, conflict_id: &str, now: NaiveDateTime) -> DispatchResult<()> {
        self.close(conflict_id, |record| {
            record.status = ConflictStatus::Expired;
            record.expired_at = Some(now);
        })?;
        self.tallies.expired += 1;
        Ok(())
    }

    /// 状态检查: 只有 Active 的冲突可以流转
    ///
    /// 已移出归档的历史冲突按过期处理
    pub fn ensure_active(&self, conflict_id: &str) -> DispatchResult<&ConflictRecord> {
        let Some(record) = self.get(conflict_id) else {
            if self.issued(conflict_id) {
                return Err(DispatchError::StaleConflict(conflict_id.to_string()));
            }
            return Err(DispatchError::UnknownConflict(conflict_id.to_string()));
        };
        match record.status {
            ConflictStatus::Active => Ok(record),
            ConflictStatus::Resolved => Err(DispatchError::AlreadyResolved(conflict_id.to_string())),
            ConflictStatus::Expired => Err(DispatchError::StaleConflict(conflict_id.to_string())),
        }
    }
}

// ==========================================
// ConflictDetector - 检测器（参数 + 冲突记录仓）
// ==========================================

/// 单次扫描结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan: u64,
    pub detected: Vec<ConflictId>,
    pub updated: Vec<ConflictId>,
    pub expired: Vec<ConflictId>,
}

#[derive(Debug, Clone)]
pub struct ConflictDetector {
    params: DetectionParams,
    registry: ConflictRegistry,
}

impl ConflictDetector {
    pub fn new(params: DetectionParams) -> Self {
        Self {
            params,
            registry: ConflictRegistry::new(),
        }
    }

    pub fn with_registry(params: DetectionParams, registry: ConflictRegistry) -> Self {
        Self { params, registry }
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    pub fn registry(&self) -> &ConflictRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ConflictRegistry {
        &mut self.registry
    }

    /// 扫描快照，更新冲突生命周期
    pub fn scan(&mut self, snapshot: &TrackerSnapshot) -> ScanReport {
        let now = snapshot.clock();
        self.registry.scans += 1;
        let scan = self.registry.scans;

        let mut report = ScanReport {
            scan,
            ..ScanReport::default()
        };

        for contention in find_contentions(snapshot, &self.params) {
            let (id, is_new) = self.registry.observe(contention, now, scan);
            if is_new {
                report.detected.push(id);
            } else {
                report.updated.push(id);
            }
        }

        // 本次未复现的活动冲突累加未命中次数
        let missed: Vec<ConflictId> = self
            .registry
            .active
            .values()
            .filter(|id| {
                self.registry
                    .records
                    .get(*id)
                    .map_or(false, |r| r.last_seen_scan != scan)
            })
            .cloned()
            .collect();
        for id in missed {
            let expire = match self.registry.records.get_mut(&id) {
                Some(record) => {
                    record.missed_scans += 1;
                    record.missed_scans >= self.params.expiry_scans
                }
                None => false,
            };
            if expire && self.registry.expire(&id, now).is_ok() {
                tracing::info!("冲突过期: conflict_id={}", id);
                report.expired.push(id);
            }
        }

        tracing::debug!(
            "冲突扫描完成: scan={}, detected={}, updated={}, expired={}, active={}",
            scan,
            report.detected.len(),
            report.updated.len(),
            report.expired.len(),
            self.registry.active_count()
        );
        report
    }
}

/// 活动冲突排序：严重等级降序 → 评分降序 → 等级优先级高者在前 → 重叠开始早者在前
pub fn compare_by_urgency(a: &ConflictRecord, b: &ConflictRecord) -> std::cmp::Ordering {
    let sa = &a.contention;
    let sb = &b.contention;
    sb.severity
        .level
        .cmp(&sa.severity.level)
        .then(sb.severity.score.total_cmp(&sa.severity.score))
        .then(sb.top_class_priority().cmp(&sa.top_class_priority()))
        .then(sa.overlap_start.cmp(&sb.overlap_start))
        .then(a.conflict_id.cmp(&b.conflict_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::train::{ItineraryLeg, Train, TrainAction};
    use crate::domain::types::TrainClass;
    use crate::engine::network::tests::loop_definition;
    use crate::engine::network::TrackNetwork;
    use crate::engine::tracker::TrainTracker;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn tracker(clock: NaiveDateTime) -> TrainTracker {
        let network = Arc::new(TrackNetwork::load(&loop_definition()).unwrap());
        TrainTracker::new(network, clock)
    }

    fn single_leg(id: &str, class: TrainClass, section: &str, entry: NaiveDateTime, exit: NaiveDateTime) -> Train {
        Train::new(id, id, class, 200.0, vec![ItineraryLeg::new(section, entry, exit)])
    }

    fn params(reaction_minutes: i64) -> DetectionParams {
        DetectionParams {
            horizon: Duration::minutes(30),
            reaction_window: Duration::minutes(reaction_minutes),
            expiry_scans: 3,
        }
    }

    #[test]
    fn test_definitional_overlap_is_flagged() {
        // MAIN 容量 1：E1 8:02-8:10，F1 8:07-8:15，重叠 3 分钟
        let mut t = tracker(at(8, 0, 0));
        t.register_train(single_leg("E1", TrainClass::Express, "MAIN", at(8, 2, 0), at(8, 10, 0)))
            .unwrap();
        t.register_train(single_leg("F1", TrainClass::Freight, "MAIN", at(8, 7, 0), at(8, 15, 0)))
            .unwrap();

        let found = find_contentions(&t.snapshot(), &params(10));
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.section_id, "MAIN");
        assert_eq!(c.leader.train_id, "E1");
        assert_eq!(c.follower.train_id, "F1");
        assert_eq!(c.overlap_start, at(8, 7, 0));
        assert_eq!(c.overlap_end, at(8, 10, 0));
        assert_eq!(c.time_to_entry_secs, 420);
    }

    #[test]
    fn test_three_minute_overlap_is_high_severity() {
        let mut t = tracker(at(8, 0, 0));
        t.register_train(single_leg("P1", TrainClass::Passenger, "MAIN", at(8, 0, 0), at(8, 6, 0)))
            .unwrap();
        t.register_train(single_leg("P2", TrainClass::Passenger, "MAIN", at(8, 3, 0), at(8, 9, 0)))
            .unwrap();
        t.advance(Duration::seconds(30)).unwrap();

        let found = find_contentions(&t.snapshot(), &params(5));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].overlap(), Duration::minutes(3));
        assert_eq!(found[0].severity.level, SeverityLevel::High);
    }

    #[test]
    fn test_contention_occurring_now_is_critical() {
        let mut t = tracker(at(8, 0, 0));
        t.register_train(single_leg("P1", TrainClass::Passenger, "MAIN", at(8, 0, 0), at(8, 6, 0)))
            .unwrap();
        t.register_train(single_leg("P2", TrainClass::Passenger, "MAIN", at(8, 0, 0), at(8, 6, 0)))
            .unwrap();
        let found = find_contentions(&t.snapshot(), &params(5));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity.level, SeverityLevel::Critical);
    }

    #[test]
    fn test_beyond_reaction_window_not_flagged() {
        let mut t = tracker(at(8, 0, 0));
        t.register_train(single_leg("P1", TrainClass::Passenger, "MAIN", at(8, 20, 0), at(8, 26, 0)))
            .unwrap();
        t.register_train(single_leg("P2", TrainClass::Passenger, "MAIN", at(8, 22, 0), at(8, 28, 0)))
            .unwrap();
        assert!(find_contentions(&t.snapshot(), &params(10)).is_empty());
        assert_eq!(find_contentions(&t.snapshot(), &params(25)).len(), 1);
    }

    #[test]
    fn test_platform_capacity_respected() {
        // B_P1 容量 2：两车同时占用不冲突，第三车进入才冲突
        let mut t = tracker(at(8, 0, 0));
        t.register_train(single_leg("P1", TrainClass::Passenger, "B_P1", at(8, 1, 0), at(8, 8, 0)))
            .unwrap();
        t.register_train(single_leg("P2", TrainClass::Passenger, "B_P1", at(8, 2, 0), at(8, 8, 0)))
            .unwrap();
        assert!(find_contentions(&t.snapshot(), &params(10)).is_empty());

        t.register_train(single_leg("P3", TrainClass::Freight, "B_P1", at(8, 5, 0), at(8, 12, 0)))
            .unwrap();
        let found = find_contentions(&t.snapshot(), &params(10));
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|c| c.overlap_start == at(8, 5, 0)));
        assert!(found.iter().all(|c| c.overlap_end == at(8, 8, 0)));
    }

    #[test]
    fn test_back_to_back_occupancy_is_not_conflict() {
        let mut t = tracker(at(8, 0, 0));
        t.register_train(single_leg("P1", TrainClass::Passenger, "MAIN", at(8, 1, 0), at(8, 6, 0)))
            .unwrap();
        t.register_train(single_leg("P2", TrainClass::Passenger, "MAIN", at(8, 6, 0), at(8, 11, 0)))
            .unwrap();
        assert!(find_contentions(&t.snapshot(), &params(10)).is_empty());
    }

    #[test]
    fn test_stable_identity_and_expiry_after_k_misses() {
        let mut t = tracker(at(8, 0, 0));
        t.register_train(single_leg("E1", TrainClass::Express, "MAIN", at(8, 2, 0), at(8, 10, 0)))
            .unwrap();
        t.register_train(single_leg("F1", TrainClass::Freight, "MAIN", at(8, 7, 0), at(8, 15, 0)))
            .unwrap();
        let mut detector = ConflictDetector::new(params(10));

        let first = detector.scan(&t.snapshot());
        assert_eq!(first.detected.len(), 1);
        let id = first.detected[0].clone();
        assert_eq!(id, "CF-000001");

        let second = detector.scan(&t.snapshot());
        assert!(second.detected.is_empty());
        assert_eq!(second.updated, vec![id.clone()]);

        // 货车在始发扣车，冲突不再复现
        t.apply_actions(&[TrainAction::hold("F1", None, Duration::minutes(10))])
            .unwrap();
        let s1 = detector.scan(&t.snapshot());
        let s2 = detector.scan(&t.snapshot());
        assert!(s1.expired.is_empty() && s2.expired.is_empty());
        assert_eq!(detector.registry().active_count(), 1);

        let s3 = detector.scan(&t.snapshot());
        assert_eq!(s3.expired, vec![id.clone()]);
        assert_eq!(detector.registry().active_count(), 0);
        assert_eq!(
            detector.registry().get(&id).unwrap().status,
            ConflictStatus::Expired
        );
        assert!(matches!(
            detector.registry().ensure_active(&id),
            Err(DispatchError::StaleConflict(_))
        ));
    }

    #[test]
    fn test_resolved_conflict_gets_new_id_when_recurring() {
        let mut t = tracker(at(8, 0, 0));
        t.register_train(single_leg("E1", TrainClass::Express, "MAIN", at(8, 2, 0), at(8, 10, 0)))
            .unwrap();
        t.register_train(single_leg("F1", TrainClass::Freight, "MAIN", at(8, 7, 0), at(8, 15, 0)))
            .unwrap();
        let mut detector = ConflictDetector::new(params(10));
        let id = detector.scan(&t.snapshot()).detected[0].clone();

        detector
            .registry_mut()
            .resolve(&id, &"opt".to_string(), at(8, 0, 0))
            .unwrap();
        assert!(matches!(
            detector.registry_mut().resolve(&id, &"opt".to_string(), at(8, 0, 0)),
            Err(DispatchError::AlreadyResolved(_))
        ));

        let again = detector.scan(&t.snapshot());
        assert_eq!(again.detected, vec!["CF-000002".to_string()]);
    }

    #[test]
    fn test_archive_is_capped_and_tallies_keep_history() {
        let mut t = tracker(at(8, 0, 0));
        t.register_train(single_leg("E1", TrainClass::Express, "MAIN", at(8, 2, 0), at(8, 10, 0)))
            .unwrap();
        t.register_train(single_leg("F1", TrainClass::Freight, "MAIN", at(8, 7, 0), at(8, 15, 0)))
            .unwrap();
        let mut detector = ConflictDetector::new(params(10));

        // 每轮疏解后同一列车对再次检出，得到新的冲突ID
        let rounds = ARCHIVE_LIMIT + 2;
        for _ in 0..rounds {
            let id = detector.scan(&t.snapshot()).detected[0].clone();
            detector
                .registry_mut()
                .resolve(&id, &"opt".to_string(), at(8, 0, 0))
                .unwrap();
        }

        let registry = detector.registry();
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.archived().count(), ARCHIVE_LIMIT);
        assert_eq!(registry.tallies().detected, rounds);
        assert_eq!(registry.tallies().resolved, rounds);
        assert_eq!(registry.tallies().by_section.get("MAIN"), Some(&rounds));

        // 最早的冲突已移出归档，仍判为过期而不是不存在
        assert!(registry.get("CF-000001").is_none());
        assert!(matches!(
            registry.ensure_active("CF-000001"),
            Err(DispatchError::StaleConflict(_))
        ));
        assert!(matches!(
            registry.ensure_active(&format!("CF-{:06}", rounds)),
            Err(DispatchError::AlreadyResolved(_))
        ));
        assert!(matches!(
            registry.ensure_active("CF-999999"),
            Err(DispatchError::UnknownConflict(_))
        ));

        let json = serde_json::to_string(registry).unwrap();
        let restored: ConflictRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tallies(), registry.tallies());
        assert_eq!(restored.archived().count(), ARCHIVE_LIMIT);
    }

    #[test]
    fn test_registry_serde_rebuilds_active_index() {
        let mut t = tracker(at(8, 0, 0));
        t.register_train(single_leg("E1", TrainClass::Express, "MAIN", at(8, 2, 0), at(8, 10, 0)))
            .unwrap();
        t.register_train(single_leg("F1", TrainClass::Freight, "MAIN", at(8, 7, 0), at(8, 15, 0)))
            .unwrap();
        let mut detector = ConflictDetector::new(params(10));
        detector.scan(&t.snapshot());

        let json = serde_json::to_string(detector.registry()).unwrap();
        let restored: ConflictRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.active_count(), 1);
        assert_eq!(restored.scans(), 1);
        let key = ConflictKey::new("MAIN", "F1", "E1");
        assert_eq!(restored.find_active(&key).unwrap().conflict_id, "CF-000001");
    }
}
