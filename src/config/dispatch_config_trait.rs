// ==========================================
// 铁路区段调度系统 - 调度配置读取 Trait
// ==========================================
// 职责: 定义调度服务所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::dispatch_config::DispatchConfig;
use async_trait::async_trait;
use std::error::Error;

// ==========================================
// DispatchConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait DispatchConfigReader: Send + Sync {
    /// tick 间隔（秒）
    ///
    /// # 默认值
    /// - 5
    async fn get_tick_interval_secs(&self) -> Result<i64, Box<dyn Error + Send + Sync>>;

    /// 瞭望窗口 H（分钟）
    ///
    /// # 默认值
    /// - 30
    async fn get_lookahead_horizon_minutes(&self) -> Result<i64, Box<dyn Error + Send + Sync>>;

    /// 响应阈值 R（分钟）：重叠开始距今不超过 R 才判定为冲突
    ///
    /// # 默认值
    /// - 10
    async fn get_reaction_threshold_minutes(&self) -> Result<i64, Box<dyn Error + Send + Sync>>;

    /// 冲突过期所需的连续未复现扫描次数 K
    ///
    /// # 默认值
    /// - 3
    async fn get_expiry_scans(&self) -> Result<u32, Box<dyn Error + Send + Sync>>;

    /// 扣车安全余量（分钟）
    ///
    /// # 默认值
    /// - 2
    async fn get_safety_margin_minutes(&self) -> Result<i64, Box<dyn Error + Send + Sync>>;

    /// 迂回径路最大区段数
    ///
    /// # 默认值
    /// - 4
    async fn get_max_reroute_hops(&self) -> Result<usize, Box<dyn Error + Send + Sync>>;

    /// 轻微晚点阈值（分钟）
    ///
    /// # 默认值
    /// - 10
    async fn get_slight_delay_threshold_minutes(&self) -> Result<i64, Box<dyn Error + Send + Sync>>;

    async fn get_snapshot_retention(&self) -> Result<usize, Box<dyn Error + Send + Sync>>;

    /// 汇总为 DispatchConfig
    async fn load_dispatch_config(&self) -> Result<DispatchConfig, Box<dyn Error + Send + Sync>> {
        Ok(DispatchConfig {
            tick_interval_secs: self.get_tick_interval_secs().await?,
            lookahead_horizon_secs: self.get_lookahead_horizon_minutes().await? * 60,
            reaction_threshold_secs: self.get_reaction_threshold_minutes().await? * 60,
            expiry_scans: self.get_expiry_scans().await?,
            safety_margin_secs: self.get_safety_margin_minutes().await? * 60,
            max_reroute_hops: self.get_max_reroute_hops().await?,
            slight_delay_threshold_secs: self.get_slight_delay_threshold_minutes().await? * 60,
            snapshot_retention: self.get_snapshot_retention().await?,
        })
    }
}
