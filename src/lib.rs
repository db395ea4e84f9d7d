// ==========================================
// 铁路区段调度系统 - 核心库
// ==========================================
// 技术栈: Rust + Tokio + SQLite
// 系统定位: 调度决策支持（人工最终采纳）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 采纳履历与调度快照
pub mod repository;

// 引擎层 - 推进、检测、疏解、主循环
pub mod engine;

// 导入层 - 线路定义与运行图
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 资源装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ConflictStatus, ResolutionStrategy, SectionKind, SeverityLevel, TrainClass, TrainStatus,
};

// 领域实体
pub use domain::{
    ConflictRecord, NetworkDefinition, ResolutionOption, ResolutionRecord, Train, TrainAction,
};

// 引擎
pub use engine::{
    ConflictDetector, DispatchError, DispatchScheduler, ResolutionRecommender, TrackNetwork,
    TrainTracker,
};

// API
pub use api::{ApiError, ApiResult, DispatchApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "铁路区段调度系统";
