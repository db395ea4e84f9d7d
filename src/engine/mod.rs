// ==========================================
// 铁路区段调度系统 - 引擎层
// ==========================================
// 职责: 线路拓扑、列车推进与推演、冲突检测、疏解方案、调度主循环
// 红线: Engine 不拼 SQL；核心只依赖事件发布 trait，不依赖推送机制
// ==========================================

pub mod detector;
pub mod error;
pub mod events;
pub mod kpi;
pub mod network;
pub mod recommender;
pub mod scheduler;
pub mod tracker;

// 重导出核心引擎
pub use detector::{
    compare_by_urgency, find_contentions, ConflictDetector, ConflictRegistry, DetectionParams,
    ScanReport,
};
pub use error::{DispatchError, DispatchResult};
pub use events::{
    BroadcastEventPublisher, DispatchEvent, DispatchEventPublisher, NoOpEventPublisher,
    OptionalEventPublisher,
};
pub use kpi::{ConflictPatterns, ConflictStatistics, NetworkStatus, WhatIfReport};
pub use network::TrackNetwork;
pub use recommender::{RecommenderParams, ResolutionRecommender};
pub use scheduler::{DispatchScheduler, DispatchSnapshotPayload, DispatchState, TickReport};
pub use tracker::{TrackerSnapshot, TrackerState, TrainProjection, TrainTracker};
