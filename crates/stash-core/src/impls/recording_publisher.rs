//! RecordingPublisher - 開発用の RemotePublisher
//!
//! 送られたメッセージをメモリに記録します。失敗モードと遅延を切り替えられるので、
//! FallbackPublisher / Republisher のテストや CLI の demo で使います。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::PublishError;
use crate::ports::RemotePublisher;

pub struct RecordingPublisher<M> {
    sent: Mutex<Vec<(String, M)>>,
    failing: AtomicBool,
    failing_events: Mutex<HashSet<String>>,
    delay_ms: AtomicU64,
    calls: AtomicU64,
}

impl<M: Clone> RecordingPublisher<M> {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            failing_events: Mutex::new(HashSet::new()),
            delay_ms: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Reject every call while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Reject calls for `event` only.
    pub fn fail_event(&self, event: &str) {
        self.failing_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.to_string());
    }

    /// Sleep this long before answering each call.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Messages accepted so far, with their event names, in delivery order.
    pub fn sent(&self) -> Vec<(String, M)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `post` / `post_batch` calls, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn attempt(&self, event: &str) -> Result<(), PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Unreachable("publisher is offline".to_string()));
        }
        let rejected = self
            .failing_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(event);
        if rejected {
            return Err(PublishError::Rejected(format!("event {event} rejected")));
        }
        Ok(())
    }
}

impl<M: Clone> Default for RecordingPublisher<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M> RemotePublisher<M> for RecordingPublisher<M>
where
    M: Clone + Send + Sync + 'static,
{
    async fn post(&self, message: &M, event: &str) -> Result<(), PublishError> {
        self.attempt(event).await?;
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.to_string(), message.clone()));
        Ok(())
    }

    async fn post_batch(&self, messages: &[M], event: &str) -> Result<(), PublishError> {
        self.attempt(event).await?;
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(messages.iter().map(|m| (event.to_string(), m.clone())));
        Ok(())
    }
}
