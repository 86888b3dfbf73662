//! Escalation port - pushback 時に retry か DLQ 退避かを決める
//!
//! Republisher は peek したバッチをそのまま渡し、戻り値を `retry()`、
//! それ以外を `remove()` します。バックエンドには依存しません。
//!
//! # 実装
//! - **DeadLetterEscalation**: retry_count が閾値を超えたものを DLQ へ
//! - **RetryAll**: すべて retry（DLQ 自体を drain するとき）

use async_trait::async_trait;

use crate::domain::{QueueError, QueuedTask};

#[async_trait]
pub trait Escalation: Send + Sync {
    /// Return the subset of `batch` that should be retried in place.
    ///
    /// Anything not returned has already been handed off elsewhere by the
    /// time this resolves, and the caller removes it from the source.
    async fn decide(&self, batch: Vec<QueuedTask>) -> Result<Vec<QueuedTask>, QueueError>;
}
