// ==========================================
// 铁路区段调度系统 - 调度参数
// ==========================================

use crate::engine::detector::DetectionParams;
use crate::engine::recommender::RecommenderParams;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// 调度参数（时长字段以秒存储）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// tick 间隔（同时作为仿真时钟步长）
    pub tick_interval_secs: i64,
    /// 瞭望窗口 H
    pub lookahead_horizon_secs: i64,
    /// 响应阈值 R
    pub reaction_threshold_secs: i64,
    /// 连续未复现 K 次即过期
    pub expiry_scans: u32,
    pub safety_margin_secs: i64,
    pub max_reroute_hops: usize,
    /// 轻微晚点上限（超过即判定晚点）
    pub slight_delay_threshold_secs: i64,
    /// 快照保留份数
    pub snapshot_retention: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            lookahead_horizon_secs: 30 * 60,
            reaction_threshold_secs: 10 * 60,
            expiry_scans: 3,
            safety_margin_secs: 2 * 60,
            max_reroute_hops: 4,
            slight_delay_threshold_secs: 10 * 60,
            snapshot_retention: 20,
        }
    }
}

impl DispatchConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::seconds(self.tick_interval_secs)
    }

    pub fn slight_delay_threshold_minutes(&self) -> f64 {
        self.slight_delay_threshold_secs as f64 / 60.0
    }

    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            horizon: Duration::seconds(self.lookahead_horizon_secs),
            reaction_window: Duration::seconds(self.reaction_threshold_secs),
            expiry_scans: self.expiry_scans,
        }
    }

    pub fn recommender_params(&self) -> RecommenderParams {
        RecommenderParams {
            safety_margin: Duration::seconds(self.safety_margin_secs),
            max_reroute_hops: self.max_reroute_hops,
            detection: self.detection_params(),
        }
    }
}
