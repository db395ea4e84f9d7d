// ==========================================
// 铁路区段调度系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::dispatch_config::DispatchConfig;
use crate::config::dispatch_config_trait::DispatchConfigReader;
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::ensure_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
            crate::db::ensure_schema(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 读取数值配置；缺失用默认值，格式错误或非正数时告警并回退默认值
    fn get_positive_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
    {
        let Some(raw) = self.get_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %raw,
                    "配置值无效，使用默认值 {}",
                    default
                );
                Ok(default)
            }
        }
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_config(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        tracing::info!("配置已更新: key={}, value={}", key, value);
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 随调度快照一起落库，便于追溯当时的参数
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }
}

// ==========================================
// DispatchConfigReader Trait 实现
// ==========================================
#[async_trait]
impl DispatchConfigReader for ConfigManager {
    async fn get_tick_interval_secs(&self) -> ConfigResult<i64> {
        let default = DispatchConfig::default().tick_interval_secs;
        self.get_positive_or_default(config_keys::TICK_INTERVAL_SECS, default)
    }

    async fn get_lookahead_horizon_minutes(&self) -> ConfigResult<i64> {
        self.get_positive_or_default(config_keys::LOOKAHEAD_HORIZON_MINUTES, 30)
    }

    async fn get_reaction_threshold_minutes(&self) -> ConfigResult<i64> {
        self.get_positive_or_default(config_keys::REACTION_THRESHOLD_MINUTES, 10)
    }

    async fn get_expiry_scans(&self) -> ConfigResult<u32> {
        self.get_positive_or_default(config_keys::EXPIRY_SCANS, 3)
    }

    async fn get_safety_margin_minutes(&self) -> ConfigResult<i64> {
        self.get_positive_or_default(config_keys::SAFETY_MARGIN_MINUTES, 2)
    }

    async fn get_max_reroute_hops(&self) -> ConfigResult<usize> {
        self.get_positive_or_default(config_keys::MAX_REROUTE_HOPS, 4)
    }

    async fn get_slight_delay_threshold_minutes(&self) -> ConfigResult<i64> {
        self.get_positive_or_default(config_keys::SLIGHT_DELAY_THRESHOLD_MINUTES, 10)
    }

    async fn get_snapshot_retention(&self) -> ConfigResult<usize> {
        let default = DispatchConfig::default().snapshot_retention;
        self.get_positive_or_default(config_keys::SNAPSHOT_RETENTION, default)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 时钟
    pub const TICK_INTERVAL_SECS: &str = "tick_interval_secs";

    // 冲突检测
    pub const LOOKAHEAD_HORIZON_MINUTES: &str = "lookahead_horizon_minutes";
    pub const REACTION_THRESHOLD_MINUTES: &str = "reaction_threshold_minutes";
    pub const EXPIRY_SCANS: &str = "expiry_scans";

    // 疏解方案
    pub const SAFETY_MARGIN_MINUTES: &str = "safety_margin_minutes";
    pub const MAX_REROUTE_HOPS: &str = "max_reroute_hops";

    // 状态报告
    pub const SLIGHT_DELAY_THRESHOLD_MINUTES: &str = "slight_delay_threshold_minutes";

    // 快照
    pub const SNAPSHOT_RETENTION: &str = "snapshot_retention";
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn manager() -> (NamedTempFile, ConfigManager) {
        let file = NamedTempFile::new().unwrap();
        let manager = ConfigManager::new(file.path().to_str().unwrap()).unwrap();
        (file, manager)
    }

    #[tokio::test]
    async fn test_defaults_when_empty() {
        let (_file, manager) = manager();
        let config = manager.load_dispatch_config().await.unwrap();
        assert_eq!(config, DispatchConfig::default());
    }

    #[tokio::test]
    async fn test_overrides_and_invalid_values() {
        let (_file, manager) = manager();
        manager.set_config(config_keys::REACTION_THRESHOLD_MINUTES, "5").unwrap();
        manager.set_config(config_keys::EXPIRY_SCANS, "abc").unwrap();
        manager.set_config(config_keys::SAFETY_MARGIN_MINUTES, "-1").unwrap();

        let config = manager.load_dispatch_config().await.unwrap();
        assert_eq!(config.reaction_threshold_secs, 300);
        assert_eq!(config.expiry_scans, 3);
        assert_eq!(config.safety_margin_secs, 120);
    }

    #[test]
    fn test_config_snapshot_json() {
        let (_file, manager) = manager();
        manager.set_config(config_keys::MAX_REROUTE_HOPS, "6").unwrap();
        manager.set_config(config_keys::EXPIRY_SCANS, "4").unwrap();

        let snapshot: BTreeMap<String, String> =
            serde_json::from_str(&manager.get_config_snapshot().unwrap()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("max_reroute_hops").map(String::as_str), Some("6"));
    }
}
