// ==========================================
// 铁路区段调度系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体与类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod conflict;
pub mod network;
pub mod resolution;
pub mod train;
pub mod types;

// 重导出核心类型
pub use conflict::{ConflictKey, ConflictParty, ConflictRecord, Contention, Severity};
pub use network::{NetworkDefinition, NodeDefinition, SectionDefinition};
pub use resolution::{OptionImpact, ResolutionOption, ResolutionRecord};
pub use train::{ActionKind, ItineraryLeg, Train, TrainAction, TrainPosition};
pub use types::{
    ConflictId, ConflictStatus, NodeId, NodeKind, OptionId, ResolutionStrategy, SectionId,
    SectionKind, SeverityLevel, TrainClass, TrainId, TrainStatus,
};
