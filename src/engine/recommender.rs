// ==========================================
// 铁路区段调度系统 - 疏解方案推荐器
// ==========================================
// 职责: 针对单个冲突生成候选疏解方案，并以 what-if 推演计算影响
// 红线: 在只读快照上计算，不修改 Tracker；结果确定、非空
// ==========================================
// 候选策略:
// 1. PriorityHold  - 低优先级列车在区段前扣车，待对方出清 + 安全余量
// 2. BalancedHold  - 按晚点容忍度分摊间隔：后车扣车、前车动用图定缓冲提前出清
// 3. Reroute       - 未进入区段的列车改走迂回径路
// 排序: 全网晚点增量 → 受影响列车数 → 代价由低等级承担 → 策略顺序
// 校验: 方案按当前快照重新取冲突几何；瞭望窗口 H 内仍超容量即视为未疏解
// ==========================================

use crate::domain::conflict::{ConflictKey, ConflictParty, ConflictRecord, Contention};
use crate::domain::resolution::{OptionImpact, ResolutionOption};
use crate::domain::train::TrainAction;
use crate::domain::types::{duration_minutes, ResolutionStrategy, SectionId, TrainId};
use crate::engine::detector::{contentions_from, DetectionParams};
use crate::engine::tracker::{TrackerSnapshot, TrainProjection};
use chrono::Duration;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecommenderParams {
    pub safety_margin: Duration,
    pub max_reroute_hops: usize,
    pub detection: DetectionParams,
}

impl RecommenderParams {
    /// 方案校验口径：响应阈值放宽到瞭望窗口
    pub fn verification(&self) -> DetectionParams {
        DetectionParams {
            reaction_window: self.detection.horizon,
            ..self.detection
        }
    }
}

impl Default for RecommenderParams {
    fn default() -> Self {
        Self {
            safety_margin: Duration::minutes(2),
            max_reroute_hops: 4,
            detection: DetectionParams::default(),
        }
    }
}

// ==========================================
// 推演基线（每次推荐计算一次）
// ==========================================
struct Baseline {
    projections: BTreeMap<TrainId, TrainProjection>,
    contentions: BTreeMap<ConflictKey, Contention>,
    clearances: usize,
}

impl Baseline {
    fn compute(snapshot: &TrackerSnapshot, detection: &DetectionParams) -> Self {
        let projections = snapshot.project_all();
        let contentions = contentions_from(snapshot, &projections, detection)
            .into_iter()
            .map(|c| (c.key(), c))
            .collect();
        let until = snapshot.clock() + detection.horizon;
        let clearances = projections.iter().map(|p| p.clearances_before(until)).sum();
        Self {
            projections: projections
                .into_iter()
                .map(|p| (p.train_id.clone(), p))
                .collect(),
            contentions,
            clearances,
        }
    }
}

/// 推演评估结果
struct Evaluation {
    impact: OptionImpact,
    after: Vec<Contention>,
}

// ==========================================
// ResolutionRecommender
// ==========================================
#[derive(Debug, Clone)]
pub struct ResolutionRecommender {
    params: RecommenderParams,
}

impl ResolutionRecommender {
    pub fn new(params: RecommenderParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RecommenderParams {
        &self.params
    }

    /// 为冲突生成排序后的候选方案（无可行方案时返回单个哨兵）
    ///
    /// 扣车时长等按快照中的当前占用计算，不沿用扫描时记录的几何
    pub fn recommend(&self, record: &ConflictRecord, snapshot: &TrackerSnapshot) -> Vec<ResolutionOption> {
        let baseline = Baseline::compute(snapshot, &self.params.verification());
        let Some(current) = baseline.contentions.get(&record.key()) else {
            tracing::debug!(
                "当前推演中冲突已不存在: conflict_id={}, revision={}",
                record.conflict_id,
                snapshot.revision()
            );
            return vec![ResolutionOption::no_feasible(
                &record.conflict_id,
                "当前推演中该列车对已无占用冲突",
                snapshot.revision(),
            )];
        };
        let refreshed = ConflictRecord {
            contention: current.clone(),
            ..record.clone()
        };
        let record = &refreshed;

        let mut options = Vec::new();
        let mut rejected = Vec::new();

        match self.priority_hold(record, snapshot, &baseline) {
            Ok(option) => options.push(option),
            Err(reason) => rejected.push(format!("优先级扣车: {}", reason)),
        }
        match self.balanced_hold(record, snapshot, &baseline) {
            Ok(option) => options.push(option),
            Err(reason) => rejected.push(format!("均衡扣车: {}", reason)),
        }
        let (reroutes, reroute_reasons) = self.reroutes(record, snapshot, &baseline);
        options.extend(reroutes);
        rejected.extend(reroute_reasons);

        if options.is_empty() {
            tracing::warn!(
                "冲突无可行疏解方案: conflict_id={}, reasons={}",
                record.conflict_id,
                rejected.join("; ")
            );
            return vec![ResolutionOption::no_feasible(
                &record.conflict_id,
                &rejected.join("; "),
                snapshot.revision(),
            )];
        }

        rank_options(&mut options, &record.contention);
        tracing::debug!(
            "生成疏解方案: conflict_id={}, options={}, rejected={}",
            record.conflict_id,
            options.len(),
            rejected.len()
        );
        options
    }

    // ==========================================
    // 策略 1: 优先级扣车
    // ==========================================
    fn priority_hold(
        &self,
        record: &ConflictRecord,
        snapshot: &TrackerSnapshot,
        baseline: &Baseline,
    ) -> Result<ResolutionOption, String> {
        let c = &record.contention;
        let (yielder, other, yielder_leads) = if c.leader.priority < c.follower.priority {
            (&c.leader, &c.follower, true)
        } else {
            (&c.follower, &c.leader, false)
        };
        if yielder.inside {
            return Err(format!("让行列车 {} 已进入区段", yielder.train_id));
        }

        let hold = ceil_to_second(other.exit + self.params.safety_margin - yielder.entry);
        let mut actions = vec![TrainAction::hold(&yielder.train_id, Some(&c.section_id), hold)];
        if yielder_leads {
            let precedence = yielder.priority.max(other.priority).saturating_add(1);
            actions.push(TrainAction::resequence(&other.train_id, &c.section_id, precedence));
        }

        let evaluation = self.evaluate(record, snapshot, baseline, &actions)?;
        if !evaluation.impact.resolves_conflict {
            return Err("推演后冲突仍存在".to_string());
        }

        let explanation = format!(
            "{}（{}）在区段 {} 前扣车 {:.1} 分钟，待 {}（{}）出清后再进入{}；全网晚点变化 {:+.1} 分钟",
            yielder.train_id,
            yielder.class,
            c.section_id,
            duration_minutes(hold),
            other.train_id,
            other.class,
            if yielder_leads { "，并调整次序由对方先行" } else { "" },
            evaluation.impact.delay_delta_minutes
        );

        Ok(ResolutionOption {
            option_id: format!("{}-hold", record.conflict_id),
            conflict_id: record.conflict_id.clone(),
            strategy: ResolutionStrategy::PriorityHold,
            actions,
            impact: evaluation.impact,
            cost_bearer: Some(yielder.class),
            explanation,
            computed_at_revision: snapshot.revision(),
        })
    }

    // ==========================================
    // 策略 2: 均衡扣车
    // ==========================================
    fn balanced_hold(
        &self,
        record: &ConflictRecord,
        snapshot: &TrackerSnapshot,
        baseline: &Baseline,
    ) -> Result<ResolutionOption, String> {
        let c = &record.contention;
        let leader = &c.leader;
        let follower = &c.follower;
        if follower.inside {
            return Err(format!("后车 {} 已进入区段", follower.train_id));
        }

        let clearance = ceil_to_second(leader.exit + self.params.safety_margin - follower.entry);
        if clearance <= Duration::zero() {
            return Err("无需分摊间隔".to_string());
        }

        let follower_slack = snapshot
            .slack_after(&follower.train_id, &c.section_id)
            .map_err(|e| e.to_string())?;
        let leader_buffer = snapshot
            .expedite_capacity(&leader.train_id, &c.section_id)
            .map_err(|e| e.to_string())?;
        if follower_slack <= Duration::zero() {
            return Err(format!("后车 {} 无图定缓冲", follower.train_id));
        }
        if leader_buffer <= Duration::zero() {
            return Err(format!("前车 {} 无图定缓冲", leader.train_id));
        }

        let follower_tol = follower.class.delay_tolerance();
        let leader_tol = leader.class.delay_tolerance();
        let follower_secs =
            (clearance.num_seconds() as f64 * follower_tol / (follower_tol + leader_tol)).ceil() as i64;
        let follower_share = Duration::seconds(follower_secs.min(clearance.num_seconds()));
        let leader_share = clearance - follower_share;

        if follower_share > follower_slack {
            return Err(format!(
                "后车 {} 缓冲 {:.1} 分钟不足以吸收 {:.1} 分钟扣车",
                follower.train_id,
                duration_minutes(follower_slack),
                duration_minutes(follower_share)
            ));
        }
        if leader_share > leader_buffer {
            return Err(format!(
                "前车 {} 缓冲 {:.1} 分钟不足以提前 {:.1} 分钟",
                leader.train_id,
                duration_minutes(leader_buffer),
                duration_minutes(leader_share)
            ));
        }

        let mut actions = Vec::new();
        if follower_share > Duration::zero() {
            actions.push(TrainAction::hold(
                &follower.train_id,
                Some(&c.section_id),
                follower_share,
            ));
        }
        if leader_share > Duration::zero() {
            actions.push(TrainAction::expedite(
                &leader.train_id,
                &c.section_id,
                leader_share,
            ));
        }

        let evaluation = self.evaluate(record, snapshot, baseline, &actions)?;
        if !evaluation.impact.resolves_conflict {
            return Err("推演后冲突仍存在".to_string());
        }

        let explanation = format!(
            "按晚点容忍度分摊 {:.1} 分钟间隔：{}（{}）在区段 {} 前扣车 {:.1} 分钟，{}（{}）提前 {:.1} 分钟出清；全网晚点变化 {:+.1} 分钟",
            duration_minutes(clearance),
            follower.train_id,
            follower.class,
            c.section_id,
            duration_minutes(follower_share),
            leader.train_id,
            leader.class,
            duration_minutes(leader_share),
            evaluation.impact.delay_delta_minutes
        );

        Ok(ResolutionOption {
            option_id: format!("{}-balanced", record.conflict_id),
            conflict_id: record.conflict_id.clone(),
            strategy: ResolutionStrategy::BalancedHold,
            actions,
            impact: evaluation.impact,
            cost_bearer: Some(follower.class),
            explanation,
            computed_at_revision: snapshot.revision(),
        })
    }

    // ==========================================
    // 策略 3: 改路
    // ==========================================
    fn reroutes(
        &self,
        record: &ConflictRecord,
        snapshot: &TrackerSnapshot,
        baseline: &Baseline,
    ) -> (Vec<ResolutionOption>, Vec<String>) {
        let c = &record.contention;
        let network = snapshot.network();
        let alternates = network.alternate_paths(&c.section_id, self.params.max_reroute_hops);
        if alternates.is_empty() {
            return (Vec::new(), vec![format!("改路: 区段 {} 无迂回径路", c.section_id)]);
        }

        let mut options = Vec::new();
        let mut rejected = Vec::new();
        let mut seq = 0;

        for party in [&c.leader, &c.follower] {
            if party.inside {
                rejected.push(format!("改路: {} 已进入区段", party.train_id));
                continue;
            }
            let Some(train) = snapshot.train(&party.train_id) else {
                continue;
            };

            for via in &alternates {
                let action =
                    TrainAction::reroute(&party.train_id, vec![c.section_id.clone()], via.clone());
                let evaluation = match self.evaluate(record, snapshot, baseline, &[action.clone()]) {
                    Ok(evaluation) => evaluation,
                    Err(reason) => {
                        rejected.push(format!("改路 {} 经 {}: {}", party.train_id, via.join("→"), reason));
                        continue;
                    }
                };
                if !evaluation.impact.resolves_conflict {
                    rejected.push(format!("改路 {} 经 {}: 冲突仍存在", party.train_id, via.join("→")));
                    continue;
                }
                if let Some(blocked) = contended_on(&evaluation.after, &party.train_id, via) {
                    rejected.push(format!(
                        "改路 {} 经 {}: 迂回区段 {} 存在占用冲突",
                        party.train_id,
                        via.join("→"),
                        blocked
                    ));
                    continue;
                }

                let original = network
                    .min_running_time(&c.section_id, train.max_speed_kmh)
                    .unwrap_or_else(Duration::zero);
                let detour = via
                    .iter()
                    .filter_map(|s| network.min_running_time(s, train.max_speed_kmh))
                    .fold(Duration::zero(), |acc, d| acc + d);
                let mut impact = evaluation.impact;
                impact.extra_running_minutes = duration_minutes(detour - original);

                seq += 1;
                let explanation = format!(
                    "{}（{}）改经 {} 绕开区段 {}，附加运行 {:.1} 分钟；全网晚点变化 {:+.1} 分钟",
                    party.train_id,
                    party.class,
                    via.join("→"),
                    c.section_id,
                    impact.extra_running_minutes,
                    impact.delay_delta_minutes
                );
                options.push(ResolutionOption {
                    option_id: format!("{}-reroute-{}", record.conflict_id, seq),
                    conflict_id: record.conflict_id.clone(),
                    strategy: ResolutionStrategy::Reroute,
                    actions: vec![action],
                    impact,
                    cost_bearer: Some(party.class),
                    explanation,
                    computed_at_revision: snapshot.revision(),
                });
            }
        }
        (options, rejected)
    }

    // ==========================================
    // what-if 影响评估
    // ==========================================
    fn evaluate(
        &self,
        record: &ConflictRecord,
        snapshot: &TrackerSnapshot,
        baseline: &Baseline,
        actions: &[TrainAction],
    ) -> Result<Evaluation, String> {
        let after_snapshot = snapshot.what_if(actions).map_err(|e| e.to_string())?;
        let projections = after_snapshot.project_all();
        let after = contentions_from(&after_snapshot, &projections, &self.params.verification());

        let mut delay_delta_ms: i64 = 0;
        let mut trains_affected = 0;
        for projection in &projections {
            let Some(before) = baseline.projections.get(&projection.train_id) else {
                continue;
            };
            delay_delta_ms += reported_delay(projection).num_milliseconds()
                - reported_delay(before).num_milliseconds();
            if projection.legs != before.legs {
                trains_affected += 1;
            }
        }

        let until = after_snapshot.clock() + self.params.detection.horizon;
        let clearances: usize = projections.iter().map(|p| p.clearances_before(until)).sum();
        let target = record.key();

        let impact = OptionImpact {
            delay_delta_minutes: delay_delta_ms as f64 / 60_000.0,
            throughput_delta: clearances as i64 - baseline.clearances as i64,
            trains_affected,
            resolves_conflict: !after.iter().any(|c| c.key() == target),
            secondary_conflicts: after
                .iter()
                .filter(|c| !baseline.contentions.contains_key(&c.key()))
                .count(),
            extra_running_minutes: 0.0,
        };
        Ok(Evaluation { impact, after })
    }
}

/// 报告口径终到晚点（截断为 ≥0）
fn reported_delay(projection: &TrainProjection) -> Duration {
    projection.final_delay().max(Duration::zero())
}

fn ceil_to_second(d: Duration) -> Duration {
    let ms = d.num_milliseconds();
    Duration::seconds((ms + 999).div_euclid(1000))
}

/// 改路列车在迂回区段上是否仍有占用冲突
fn contended_on<'a>(after: &'a [Contention], train_id: &str, via: &[SectionId]) -> Option<&'a SectionId> {
    after
        .iter()
        .find(|c| c.involves(train_id) && via.contains(&c.section_id))
        .map(|c| &c.section_id)
}

/// 排序；等级不同时优先级扣车固定排在首位
fn rank_options(options: &mut [ResolutionOption], contention: &Contention) {
    options.sort_by(|a, b| {
        a.impact
            .delay_delta_minutes
            .total_cmp(&b.impact.delay_delta_minutes)
            .then(a.impact.trains_affected.cmp(&b.impact.trains_affected))
            .then(bearer_rank(a).cmp(&bearer_rank(b)))
            .then(a.strategy.cmp(&b.strategy))
            .then(a.option_id.cmp(&b.option_id))
    });

    if classes_differ(&contention.leader, &contention.follower) {
        if let Some(pos) = options
            .iter()
            .position(|o| o.strategy == ResolutionStrategy::PriorityHold)
        {
            options[..=pos].rotate_right(1);
        }
    }
}

fn bearer_rank(option: &ResolutionOption) -> u8 {
    option
        .cost_bearer
        .map(|class| class.base_priority())
        .unwrap_or(u8::MAX)
}

fn classes_differ(a: &ConflictParty, b: &ConflictParty) -> bool {
    a.class != b.class
}
