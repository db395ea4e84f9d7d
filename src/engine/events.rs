// ==========================================
// 铁路区段调度系统 - 引擎层事件发布
// ==========================================
// 职责: 定义调度事件与发布 trait，实现依赖倒置
// 说明: 引擎只依赖 DispatchEventPublisher，不关心推送机制
// ==========================================

use crate::domain::conflict::ConflictRecord;
use crate::domain::types::{ConflictId, OptionId, ResolutionStrategy, SectionId, SeverityLevel, TrainId};
use chrono::NaiveDateTime;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::broadcast;

// ==========================================
// 调度事件
// ==========================================

/// 调度事件（每个事件都携带产生它的 tick 序号）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DispatchEvent {
    ConflictDetected {
        tick: u64,
        conflict_id: ConflictId,
        section_id: SectionId,
        leader: TrainId,
        follower: TrainId,
        severity: SeverityLevel,
        score: f64,
        overlap_start: NaiveDateTime,
        overlap_end: NaiveDateTime,
    },
    ConflictResolved {
        tick: u64,
        conflict_id: ConflictId,
        option_id: OptionId,
        strategy: ResolutionStrategy,
    },
    ConflictExpired {
        tick: u64,
        conflict_id: ConflictId,
    },
    TrainUpdated {
        tick: u64,
        train_id: TrainId,
        section_id: Option<SectionId>,
        delay_minutes: f64,
        at: NaiveDateTime,
    },
    TrainCompleted {
        tick: u64,
        train_id: TrainId,
        at: NaiveDateTime,
    },
}

impl DispatchEvent {
    pub fn conflict_detected(tick: u64, record: &ConflictRecord) -> Self {
        let c = &record.contention;
        DispatchEvent::ConflictDetected {
            tick,
            conflict_id: record.conflict_id.clone(),
            section_id: c.section_id.clone(),
            leader: c.leader.train_id.clone(),
            follower: c.follower.train_id.clone(),
            severity: c.severity.level,
            score: c.severity.score,
            overlap_start: c.overlap_start,
            overlap_end: c.overlap_end,
        }
    }

    pub fn tick(&self) -> u64 {
        match self {
            DispatchEvent::ConflictDetected { tick, .. }
            | DispatchEvent::ConflictResolved { tick, .. }
            | DispatchEvent::ConflictExpired { tick, .. }
            | DispatchEvent::TrainUpdated { tick, .. }
            | DispatchEvent::TrainCompleted { tick, .. } => *tick,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchEvent::ConflictDetected { .. } => "ConflictDetected",
            DispatchEvent::ConflictResolved { .. } => "ConflictResolved",
            DispatchEvent::ConflictExpired { .. } => "ConflictExpired",
            DispatchEvent::TrainUpdated { .. } => "TrainUpdated",
            DispatchEvent::TrainCompleted { .. } => "TrainCompleted",
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 调度事件发布者
///
/// # 实现说明
/// - `BroadcastEventPublisher` 推送给进程内订阅者
/// - 发布失败只记录日志，不影响调度主流程
pub trait DispatchEventPublisher: Send + Sync {
    fn publish(&self, event: DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者（单元测试用）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl DispatchEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - tick={}, event_type={}",
            event.tick(),
            event.as_str()
        );
        Ok(())
    }
}

/// 可选的事件发布者包装
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn DispatchEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn DispatchEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件；失败记录 error 日志后吞掉
    pub fn publish(&self, event: DispatchEvent) {
        match &self.inner {
            Some(publisher) => {
                let event_type = event.as_str();
                if let Err(e) = publisher.publish(event) {
                    tracing::error!("事件发布失败: event_type={}, error={}", event_type, e);
                }
            }
            None => {
                tracing::debug!(
                    "OptionalEventPublisher: 未配置发布者，跳过事件 - tick={}, event_type={}",
                    event.tick(),
                    event.as_str()
                );
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

// ==========================================
// BroadcastEventPublisher - 进程内广播
// ==========================================

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// 基于 tokio broadcast 的发布者；慢订阅者丢弃积压事件后继续
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<DispatchEvent>,
}

impl BroadcastEventPublisher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// 订阅事件流；流在发布者全部释放后结束，重新订阅即可恢复
    pub fn subscribe(&self) -> impl Stream<Item = DispatchEvent> + Send + 'static {
        let receiver = self.sender.subscribe();
        stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("事件订阅者积压，跳过 {} 条事件", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchEventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        // 没有订阅者时 send 返回 Err，属正常情况
        if self.sender.send(event).is_err() {
            tracing::trace!("无事件订阅者");
        }
        Ok(())
    }
}
