// ==========================================
// 铁路区段调度系统 - 疏解记录数据仓储
// ==========================================
// 职责: 已采纳方案的不可变历史（resolution_log 表）
// 红线: 只追加，不修改、不删除
// ==========================================

mod core;
mod queries;

#[cfg(test)]
mod tests;

pub use core::ResolutionLogRepository;
