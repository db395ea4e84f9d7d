// ==========================================
// 铁路区段调度系统 - API 层
// ==========================================
// 职责: 提供调度业务 API 接口
// ==========================================

pub mod dispatch_api;
pub mod dto;
pub mod error;

// 重导出核心类型
pub use dispatch_api::DispatchApi;
pub use dto::{ConflictView, ImplementationOutcome, OptionView, SnapshotInfo, TrainView};
pub use error::{ApiError, ApiResult};
