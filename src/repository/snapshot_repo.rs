// ==========================================
// 铁路区段调度系统 - 调度快照仓储
// ==========================================
// 职责: 管理 dispatch_snapshot 表（Tracker + 冲突记录仓的 JSON 快照）
// 说明: 重启后从最近快照恢复，避免丢失已采纳的调度动作
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 调度快照实体
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSnapshotEntity {
    pub snapshot_id: String,          // 快照ID (UUID)
    pub tick: u64,                    // 生成时的 tick
    pub clock: NaiveDateTime,         // 仿真时钟
    pub revision: u64,                // Tracker 版本号
    pub payload_json: String,         // 快照内容
    pub config_json: Option<String>,  // 当时的配置快照
    pub created_at: NaiveDateTime,
}

impl DispatchSnapshotEntity {
    /// 创建新的快照实体（自动生成 UUID 与时间戳）
    pub fn new(
        tick: u64,
        clock: NaiveDateTime,
        revision: u64,
        payload_json: String,
        config_json: Option<String>,
    ) -> Self {
        Self {
            snapshot_id: Uuid::new_v4().to_string(),
            tick,
            clock,
            revision,
            payload_json,
            config_json,
            created_at: chrono::Local::now().naive_local(),
        }
    }
}

pub struct SnapshotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn save(&self, snapshot: &DispatchSnapshotEntity) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO dispatch_snapshot (
                snapshot_id, tick, clock, revision, payload_json, config_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                snapshot.snapshot_id,
                snapshot.tick as i64,
                snapshot.clock.format(TS_FORMAT).to_string(),
                snapshot.revision as i64,
                snapshot.payload_json,
                snapshot.config_json,
                snapshot.created_at.format(TS_FORMAT).to_string(),
            ],
        )?;
        Ok(snapshot.snapshot_id.clone())
    }

    /// 最近一次快照
    pub fn load_latest(&self) -> RepositoryResult<Option<DispatchSnapshotEntity>> {
        let conn = self.get_conn()?;
        let snapshot = conn
            .query_row(
                r#"
                SELECT snapshot_id, tick, clock, revision, payload_json, config_json, created_at
                FROM dispatch_snapshot
                ORDER BY created_at DESC, tick DESC
                LIMIT 1
                "#,
                [],
                map_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// 只保留最近 keep 份快照，返回删除数量
    pub fn prune(&self, keep: usize) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute(
            r#"
            DELETE FROM dispatch_snapshot
            WHERE snapshot_id NOT IN (
                SELECT snapshot_id FROM dispatch_snapshot
                ORDER BY created_at DESC, tick DESC
                LIMIT ?
            )
            "#,
            params![keep as i64],
        )?;
        if deleted > 0 {
            tracing::debug!("清理历史快照: deleted={}, keep={}", deleted, keep);
        }
        Ok(deleted)
    }

    pub fn count(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dispatch_snapshot", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_row(row: &Row) -> rusqlite::Result<DispatchSnapshotEntity> {
    let tick: i64 = row.get(1)?;
    let clock: String = row.get(2)?;
    let revision: i64 = row.get(3)?;
    let created_at: String = row.get(6)?;
    Ok(DispatchSnapshotEntity {
        snapshot_id: row.get(0)?,
        tick: tick.max(0) as u64,
        clock: parse_ts(2, &clock)?,
        revision: revision.max(0) as u64,
        payload_json: row.get(4)?,
        config_json: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
    })
}
