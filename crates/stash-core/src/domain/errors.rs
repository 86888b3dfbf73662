//! Errors - エラー型と分類
//!
//! 層ごとに thiserror の enum を定義し、`StashError` でまとめます。
//! 呼び出し側は `StashError::kind()` で分岐します（型階層を catch しない）。

use thiserror::Error;

use super::handle::TaskHandle;

/// ErrorKind は運用上の分類
///
/// - TransientDelivery: リモート配送の一時的失敗（pushback → 閾値超えで DLQ）
/// - Serialization: ペイロードとスキーマの不一致（pushback + report、破棄しない）
/// - Durability: ローカルディスクの失敗（その呼び出しは失敗、即座に表面化）
/// - Unavailable: キューに到達できない（report してサイクル終了、次回に再試行）
/// - Internal: スケジューラ内部の失敗（panic、タイムアウト）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientDelivery,
    Serialization,
    Durability,
    Unavailable,
    Internal,
}

/// Failures of a `TaskQueue` backend.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue log corrupted at offset {offset}: {reason}")]
    Corrupted { offset: u64, reason: String },

    #[error("unsupported queue log version {0}")]
    UnsupportedVersion(u8),

    #[error("handle {0} is stale (issued by another queue or before a compaction)")]
    StaleHandle(TaskHandle),

    #[error("{field} of {len} bytes does not fit in a log record")]
    RecordTooLarge { field: &'static str, len: usize },

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    pub(crate) fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Unavailable(_) => ErrorKind::Unavailable,
            _ => ErrorKind::Durability,
        }
    }
}

/// Failures reported by the remote publisher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("publisher unreachable: {0}")]
    Unreachable(String),

    #[error("publish timed out after {0} ms")]
    Timeout(u64),
}

/// Failures of the message codec.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode payload: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum StashError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("scheduler: {0}")]
    Scheduler(String),
}

impl StashError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StashError::Queue(e) => e.kind(),
            StashError::Publish(_) => ErrorKind::TransientDelivery,
            StashError::Codec(_) => ErrorKind::Serialization,
            StashError::Scheduler(_) => ErrorKind::Internal,
        }
    }
}
