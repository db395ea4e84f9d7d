// ==========================================
// 铁路区段调度系统 - API层错误类型
// ==========================================
// 职责: 将引擎/仓储/导入错误转换为面向调用方的错误
// 说明: 所有错误信息必须包含显式原因
// ==========================================

use crate::engine::error::DispatchError;
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 调用方错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("调度动作不可行: {0}")]
    InvalidAction(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    /// 冲突已过期或被他人处理，调用方应重新获取
    #[error("冲突已失效: {0}")]
    StaleConflict(String),

    #[error("冲突已疏解，拒绝重复采纳: {0}")]
    AlreadyResolved(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("文件导入失败: {0}")]
    ImportError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 DispatchError 转换
// ==========================================
impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownTrain(id) => ApiError::NotFound(format!("列车(id={})不存在", id)),
            DispatchError::UnknownConflict(id) => {
                ApiError::NotFound(format!("冲突(id={})不存在", id))
            }
            DispatchError::UnknownOption {
                conflict_id,
                option_id,
            } => ApiError::NotFound(format!(
                "方案(id={})不属于冲突(id={})",
                option_id, conflict_id
            )),
            DispatchError::InvalidAction { train_id, reason } => {
                ApiError::InvalidAction(format!("train_id={}, {}", train_id, reason))
            }
            DispatchError::StaleConflict(id) => ApiError::StaleConflict(id),
            DispatchError::AlreadyResolved(id) => ApiError::AlreadyResolved(id),
            DispatchError::InvalidTopology(msg) => ApiError::InvalidInput(msg),
            DispatchError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::SerializationError(msg) => ApiError::InternalError(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        ApiError::ImportError(err.to_string())
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
