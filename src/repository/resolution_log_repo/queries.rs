use super::core::{ResolutionLogRepository, TS_FORMAT};
use crate::domain::resolution::ResolutionRecord;
use crate::domain::types::ResolutionStrategy;
use crate::repository::error::RepositoryResult;
use chrono::NaiveDateTime;
use rusqlite::{params, Result as SqliteResult, Row};

const SELECT_COLUMNS: &str = r#"
    SELECT record_id, conflict_id, option_id, strategy, section_id,
           actions_json, impact_json, explanation, accepted_at, tick, actor
    FROM resolution_log
"#;

impl ResolutionLogRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 查询某冲突的采纳记录
    pub fn find_by_conflict(&self, conflict_id: &str) -> RepositoryResult<Vec<ResolutionRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE conflict_id = ? ORDER BY accepted_at ASC, tick ASC",
            SELECT_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![conflict_id], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    /// 最近的采纳记录（按采纳时间倒序）
    pub fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<ResolutionRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY accepted_at DESC, tick DESC, record_id DESC LIMIT ?",
            SELECT_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![limit as i64], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM resolution_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn map_row(&self, row: &Row) -> SqliteResult<ResolutionRecord> {
        let strategy: String = row.get(3)?;
        let actions_json: String = row.get(5)?;
        let impact_json: String = row.get(6)?;
        let accepted_at_str: String = row.get(8)?;
        let tick: i64 = row.get(9)?;

        let accepted_at = NaiveDateTime::parse_from_str(&accepted_at_str, TS_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let actions = serde_json::from_str(&actions_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
        // 影响摘要仅用于展示，解析失败时置空
        let impact = serde_json::from_str(&impact_json).unwrap_or_default();

        Ok(ResolutionRecord {
            record_id: row.get(0)?,
            conflict_id: row.get(1)?,
            option_id: row.get(2)?,
            strategy: ResolutionStrategy::from_str(&strategy),
            section_id: row.get(4)?,
            actions,
            impact,
            explanation: row.get(7)?,
            accepted_at,
            tick: tick.max(0) as u64,
            actor: row.get(10)?,
        })
    }
}
