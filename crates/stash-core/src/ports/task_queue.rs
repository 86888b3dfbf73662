//! TaskQueue port - 永続 FIFO キューの契約
//!
//! FallbackPublisher と Republisher はこの trait だけに依存します。
//! バックエンド（ファイルログ / インメモリ）は構築時に選択します。
//!
//! # ハンドルの扱い
//! - `peek` で得たハンドルは、同じキューインスタンスの `remove` / `retry` にだけ渡す
//! - `compact` がバイトを回収した後は、それ以前のハンドルは `StaleHandle` で拒否される
//! - つまり `peek → remove/retry` の間に `compact` を走らせないのは呼び出し側の責務

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{QueueError, QueuedTask, Task, TaskHandle};

/// Result of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compaction {
    pub records_reclaimed: u64,
    pub reclaimed_bytes: u64,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Durably append one task with a retry count of zero.
    async fn add(&self, task: Task) -> Result<TaskHandle, QueueError>;

    /// Append several tasks in order.
    ///
    /// Not atomic: if the process dies part way, a prefix of `tasks` may
    /// survive. Handles are returned in input order.
    async fn add_batch(&self, tasks: Vec<Task>) -> Result<Vec<TaskHandle>, QueueError>;

    /// Return up to `limit` live tasks without mutating anything.
    async fn peek(&self, limit: usize) -> Result<Vec<QueuedTask>, QueueError>;

    /// Logically delete the given records. Handles that are already removed
    /// or unknown are ignored. Returns how many records were removed.
    async fn remove(&self, handles: &[TaskHandle]) -> Result<u64, QueueError>;

    /// Increment the retry count of each given live record by one.
    /// Returns how many records were updated.
    async fn retry(&self, handles: &[TaskHandle]) -> Result<u64, QueueError>;

    /// Number of live tasks.
    async fn size(&self) -> Result<u64, QueueError>;

    /// Reclaim space held by removed records, if the backend needs it.
    async fn compact(&self) -> Result<Compaction, QueueError> {
        Ok(Compaction::default())
    }
}
