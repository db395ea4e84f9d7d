// ==========================================
// 铁路区段调度系统 - 应用层
// ==========================================
// 职责: 资源装配，连接二进制入口与 API 层
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
