// ==========================================
// 铁路区段调度系统 - 导入层
// ==========================================
// 职责: 外部数据导入（线路定义 JSON、运行图 CSV）
// 红线: 只产出领域对象，拓扑校验交给 TrackNetwork::load
// ==========================================

pub mod error;
pub mod network_loader;
pub mod timetable_loader;

pub use error::{ImportError, ImportResult};
pub use network_loader::{load_network_definition, parse_network_definition};
pub use timetable_loader::TimetableLoader;
