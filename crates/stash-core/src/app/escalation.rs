//! Escalation - pushback 時の retry / DLQ 退避の判定
//!
//! # 学習ポイント
//! - 判定（`partition`）は純粋関数にして、副作用（DLQ への add）と分ける
//! - DLQ への add を先に行い、source からの remove は呼び出し側が後で行う
//!   （途中でクラッシュしても「重複」にはなるが「消失」にはならない）

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::domain::{QueueError, QueuedTask};
use crate::ports::{Escalation, TaskQueue};

/// Split `batch` into (retry, evict) by `retry_count <= threshold`.
///
/// Relative order is preserved in both halves.
pub fn partition(batch: Vec<QueuedTask>, threshold: u32) -> (Vec<QueuedTask>, Vec<QueuedTask>) {
    batch
        .into_iter()
        .partition(|task| task.retry_count() <= threshold)
}

/// Moves tasks whose retry count exceeds `threshold` into a dead-letter queue.
pub struct DeadLetterEscalation {
    threshold: u32,
    dead_letter: Arc<dyn TaskQueue>,
}

impl DeadLetterEscalation {
    pub fn new(threshold: u32, dead_letter: Arc<dyn TaskQueue>) -> Self {
        Self {
            threshold,
            dead_letter,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[async_trait]
impl Escalation for DeadLetterEscalation {
    async fn decide(&self, batch: Vec<QueuedTask>) -> Result<Vec<QueuedTask>, QueueError> {
        let (retry, evict) = partition(batch, self.threshold);
        if !evict.is_empty() {
            let count = evict.len();
            let tasks = evict.into_iter().map(QueuedTask::into_task).collect();
            self.dead_letter.add_batch(tasks).await?;
            info!(
                dead_letter = %self.dead_letter.name(),
                count,
                threshold = self.threshold,
                "escalated tasks to dead-letter queue"
            );
        }
        Ok(retry)
    }
}

/// Retries everything. Used when the source is the dead-letter queue itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryAll;

#[async_trait]
impl Escalation for RetryAll {
    async fn decide(&self, batch: Vec<QueuedTask>) -> Result<Vec<QueuedTask>, QueueError> {
        Ok(batch)
    }
}
