//! FallbackPublisher - リモート配送に失敗したらローカルキューへ退避
//!
//! 呼び出し側から見えるのは「配送できた / 退避できた」か「ハードエラー」だけです。
//! retry や DLQ の仕組みは Republisher 側に隠れています。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::{StashError, Task};
use crate::ports::{MessageCodec, RemotePublisher, TaskQueue};

/// Which path a successful publish took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// The remote channel accepted the message.
    Delivered,
    /// The remote channel failed; the message is durably queued instead.
    Queued,
}

pub struct FallbackPublisher<M> {
    publisher: Arc<dyn RemotePublisher<M>>,
    codec: Arc<dyn MessageCodec<M>>,
    queue: Arc<dyn TaskQueue>,
}

impl<M> FallbackPublisher<M>
where
    M: Send + Sync + 'static,
{
    pub fn new(
        publisher: Arc<dyn RemotePublisher<M>>,
        codec: Arc<dyn MessageCodec<M>>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            publisher,
            codec,
            queue,
        }
    }

    /// Publish `message` under `event`, falling back to the queue.
    ///
    /// Errors only when the message could be neither delivered nor queued.
    pub async fn post(&self, message: &M, event: &str) -> Result<Delivery, StashError> {
        let Err(publish_error) = self.publisher.post(message, event).await else {
            return Ok(Delivery::Delivered);
        };
        warn!(event, queue = %self.queue.name(), error = %publish_error, "publish failed, queueing message");

        let task = Task::new(event, self.codec.serialize(message)?);
        self.queue.add(task).await.map_err(|e| {
            error!(event, queue = %self.queue.name(), error = %e, "failed to queue undelivered message");
            StashError::from(e)
        })?;
        Ok(Delivery::Queued)
    }

    /// Publish `messages` as one batch; if that fails, queue every message.
    pub async fn post_batch(&self, messages: &[M], event: &str) -> Result<Delivery, StashError> {
        if messages.is_empty() {
            return Ok(Delivery::Delivered);
        }
        let Err(publish_error) = self.publisher.post_batch(messages, event).await else {
            return Ok(Delivery::Delivered);
        };
        warn!(
            event,
            batch = messages.len(),
            queue = %self.queue.name(),
            error = %publish_error,
            "batch publish failed, queueing messages"
        );

        let tasks = messages
            .iter()
            .map(|m| Ok(Task::new(event, self.codec.serialize(m)?)))
            .collect::<Result<Vec<_>, StashError>>()?;
        self.queue.add_batch(tasks).await.map_err(|e| {
            error!(event, queue = %self.queue.name(), error = %e, "failed to queue undelivered batch");
            StashError::from(e)
        })?;
        Ok(Delivery::Queued)
    }
}
