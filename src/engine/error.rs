// ==========================================
// 铁路区段调度系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 所有面向调用方的操作返回显式错误值，不跨边界 panic
// ==========================================

use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    // ===== 加载期错误（致命） =====
    #[error("线路拓扑无效: {0}")]
    InvalidTopology(String),

    // ===== 调用方错误 =====
    #[error("列车不存在: train_id={0}")]
    UnknownTrain(String),

    #[error("冲突不存在: conflict_id={0}")]
    UnknownConflict(String),

    #[error("方案不存在: conflict_id={conflict_id}, option_id={option_id}")]
    UnknownOption {
        conflict_id: String,
        option_id: String,
    },

    #[error("调度动作不可行: train_id={train_id}, reason={reason}")]
    InvalidAction { train_id: String, reason: String },

    // ===== 并发/幂等错误 =====
    #[error("冲突或其方案已失效（已过期或推演已变化），请重新获取: conflict_id={0}")]
    StaleConflict(String),

    #[error("冲突已疏解，拒绝重复采纳: conflict_id={0}")]
    AlreadyResolved(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn invalid_action(train_id: &str, reason: impl Into<String>) -> Self {
        DispatchError::InvalidAction {
            train_id: train_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result 类型别名
pub type DispatchResult<T> = Result<T, DispatchError>;
