// ==========================================
// 铁路区段调度系统 - 配置层
// ==========================================
// 职责: 调度参数管理（瞭望窗口、响应阈值、过期次数等）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod dispatch_config;
pub mod dispatch_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use dispatch_config::DispatchConfig;
pub use dispatch_config_trait::DispatchConfigReader;
