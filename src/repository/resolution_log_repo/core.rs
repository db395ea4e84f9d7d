use crate::domain::resolution::ResolutionRecord;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub(super) const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ==========================================
// ResolutionLogRepository - 疏解记录仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct ResolutionLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ResolutionLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加一条采纳记录
    ///
    /// # 返回
    /// - `Ok(record_id)`
    pub fn insert(&self, record: &ResolutionRecord) -> RepositoryResult<String> {
        let actions_json = serde_json::to_string(&record.actions)?;
        let impact_json = serde_json::to_string(&record.impact)?;
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO resolution_log (
                record_id, conflict_id, option_id, strategy, section_id,
                actions_json, impact_json, explanation, accepted_at, tick, actor
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                record.record_id,
                record.conflict_id,
                record.option_id,
                record.strategy.as_str(),
                record.section_id,
                actions_json,
                impact_json,
                record.explanation,
                record.accepted_at.format(TS_FORMAT).to_string(),
                record.tick as i64,
                record.actor,
            ],
        )?;

        Ok(record.record_id.clone())
    }
}
