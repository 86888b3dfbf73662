//! Republisher - キューに退避されたタスクの再配送（drain loop）
//!
//! # フロー（1 回の poll）
//! 1. source を選ぶ（通常は primary、K 回に 1 回 DLQ）
//! 2. peek でバッチを取得（失敗したら report して何も変更せず終了）
//! 3. payload を decode（1 件でも失敗したらバッチ全体を pushback）
//! 4. task_type ごとに post_batch（出現順、同時に 1 つだけ）
//! 5. 成功したグループは remove、失敗したグループ以降は pushback
//! 6. remove があれば compact
//!
//! # 学習ポイント
//! - pushback は Escalation を通す（閾値超えは DLQ へ）
//! - 配送エラーは bookkeeping の後で呼び出し側に返す（監視に見えるように）
//! - 重なった poll は `Busy` で即座に返す

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::escalation::{DeadLetterEscalation, RetryAll};
use crate::domain::{
    CycleId, DrainOutcome, DrainReport, DrainSource, PublishError, QueueError, QueuedTask,
    StashError, TaskHandle,
};
use crate::impls::TracingErrorSink;
use crate::ports::{Drain, ErrorSink, Escalation, MessageCodec, RemotePublisher, TaskQueue};

/// Tuning knobs for one republisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepublisherConfig {
    /// Maximum number of tasks peeked per cycle.
    pub batch_size: usize,
    /// Drain the dead-letter queue instead of the primary every Kth poll.
    /// Zero never drains it.
    pub dead_letter_every: u64,
    /// Upper bound for a single `post_batch` call.
    pub publish_timeout_ms: u64,
}

impl Default for RepublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            dead_letter_every: 10,
            publish_timeout_ms: 10_000,
        }
    }
}

struct DeadLetter {
    queue: Arc<dyn TaskQueue>,
    escalation: DeadLetterEscalation,
}

/// Tasks of one type, decoded, in peek order.
struct Group<M> {
    event: String,
    tasks: Vec<QueuedTask>,
    messages: Vec<M>,
}

pub struct Republisher<M> {
    name: String,
    primary: Arc<dyn TaskQueue>,
    dead_letter: Option<DeadLetter>,
    publisher: Arc<dyn RemotePublisher<M>>,
    codec: Arc<dyn MessageCodec<M>>,
    error_sink: Arc<dyn ErrorSink>,
    config: RepublisherConfig,
    invocations: AtomicU64,
    in_flight: Mutex<()>,
}

impl<M> Republisher<M>
where
    M: Send + Sync + 'static,
{
    pub fn new(
        primary: Arc<dyn TaskQueue>,
        publisher: Arc<dyn RemotePublisher<M>>,
        codec: Arc<dyn MessageCodec<M>>,
    ) -> Self {
        Self {
            name: format!("republisher:{}", primary.name()),
            primary,
            dead_letter: None,
            publisher,
            codec,
            error_sink: Arc::new(TracingErrorSink),
            config: RepublisherConfig::default(),
            invocations: AtomicU64::new(0),
            in_flight: Mutex::new(()),
        }
    }

    /// Escalate tasks retried more than `threshold` times into `queue`, and
    /// drain `queue` every `dead_letter_every` polls.
    pub fn with_dead_letter(mut self, queue: Arc<dyn TaskQueue>, threshold: u32) -> Self {
        self.dead_letter = Some(DeadLetter {
            escalation: DeadLetterEscalation::new(threshold, Arc::clone(&queue)),
            queue,
        });
        self
    }

    pub fn with_error_sink(mut self, error_sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = error_sink;
        self
    }

    pub fn with_config(mut self, config: RepublisherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &RepublisherConfig {
        &self.config
    }

    /// Which queue the `invocation`th poll (1-based) reads from.
    fn select_source(&self, invocation: u64) -> (DrainSource, &dyn TaskQueue, &dyn Escalation) {
        let every = self.config.dead_letter_every;
        match &self.dead_letter {
            Some(dl) if every > 0 && invocation % every == 0 => {
                (DrainSource::DeadLetter, dl.queue.as_ref(), &RetryAll)
            }
            Some(dl) => (DrainSource::Primary, self.primary.as_ref(), &dl.escalation),
            None => (DrainSource::Primary, self.primary.as_ref(), &RetryAll),
        }
    }

    /// Decode every payload and group by task type in first-appearance order.
    fn decode(&self, batch: &[QueuedTask]) -> Result<Vec<Group<M>>, StashError> {
        let mut groups: Vec<Group<M>> = Vec::new();
        for task in batch {
            let message = self.codec.deserialize(task.payload())?;
            match groups.iter_mut().find(|g| g.event == task.task_type()) {
                Some(group) => {
                    group.tasks.push(task.clone());
                    group.messages.push(message);
                }
                None => groups.push(Group {
                    event: task.task_type().to_string(),
                    tasks: vec![task.clone()],
                    messages: vec![message],
                }),
            }
        }
        Ok(groups)
    }

    async fn publish(&self, group: &Group<M>) -> Result<(), PublishError> {
        let timeout = Duration::from_millis(self.config.publish_timeout_ms);
        tokio::time::timeout(
            timeout,
            self.publisher.post_batch(&group.messages, &group.event),
        )
        .await
        .unwrap_or(Err(PublishError::Timeout(self.config.publish_timeout_ms)))
    }

    /// Retry what `escalation` keeps and remove the rest from `queue`.
    async fn push_back(
        &self,
        queue: &dyn TaskQueue,
        escalation: &dyn Escalation,
        tasks: Vec<QueuedTask>,
        report: &mut DrainReport,
    ) -> Result<(), QueueError> {
        let all: Vec<TaskHandle> = tasks.iter().map(QueuedTask::handle).collect();
        let keep: HashSet<TaskHandle> = escalation
            .decide(tasks)
            .await?
            .iter()
            .map(QueuedTask::handle)
            .collect();
        let (retry, evicted): (Vec<TaskHandle>, Vec<TaskHandle>) =
            all.into_iter().partition(|h| keep.contains(h));

        report.retried += queue.retry(&retry).await? as usize;
        if !evicted.is_empty() {
            report.dead_lettered += queue.remove(&evicted).await? as usize;
        }
        Ok(())
    }

    async fn run_cycle(&self, invocation: u64) -> Result<DrainReport, StashError> {
        let (source, queue, escalation) = self.select_source(invocation);
        let mut report = DrainReport::new(CycleId::generate(), source, DrainOutcome::Empty);

        let batch = match queue.peek(self.config.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(republisher = %self.name, queue = %queue.name(), error = %e, "peek failed");
                self.error_sink.report(&self.name, &e.into());
                report.outcome = DrainOutcome::Unavailable;
                return Ok(report);
            }
        };
        report.peeked = batch.len();
        if batch.is_empty() {
            return Ok(report);
        }

        let groups = match self.decode(&batch) {
            Ok(groups) => groups,
            Err(e) => {
                warn!(
                    republisher = %self.name,
                    queue = %queue.name(),
                    batch = batch.len(),
                    error = %e,
                    "payload decode failed, pushing batch back"
                );
                self.push_back(queue, escalation, batch, &mut report).await?;
                self.error_sink.report(&self.name, &e);
                report.reclaimed_bytes = self.compact_if(queue, report.dead_lettered > 0).await?;
                report.outcome = DrainOutcome::PushedBack;
                return Ok(report);
            }
        };

        let mut delivered: Vec<TaskHandle> = Vec::new();
        let mut failure: Option<PublishError> = None;
        let mut undelivered: Vec<QueuedTask> = Vec::new();
        for group in groups {
            if failure.is_some() {
                undelivered.extend(group.tasks);
                continue;
            }
            match self.publish(&group).await {
                Ok(()) => delivered.extend(group.tasks.iter().map(QueuedTask::handle)),
                Err(e) => {
                    warn!(
                        republisher = %self.name,
                        event = %group.event,
                        batch = group.tasks.len(),
                        error = %e,
                        "redelivery failed"
                    );
                    failure = Some(e);
                    undelivered.extend(group.tasks);
                }
            }
        }

        if !delivered.is_empty() {
            report.delivered = queue.remove(&delivered).await? as usize;
        }
        if !undelivered.is_empty() {
            self.push_back(queue, escalation, undelivered, &mut report)
                .await?;
        }
        let removed_any = report.delivered > 0 || report.dead_lettered > 0;
        report.reclaimed_bytes = self.compact_if(queue, removed_any).await?;

        if let Some(e) = failure {
            return Err(e.into());
        }

        info!(
            republisher = %self.name,
            queue = %queue.name(),
            delivered = report.delivered,
            reclaimed_bytes = report.reclaimed_bytes,
            "drained batch"
        );
        report.outcome = DrainOutcome::Delivered;
        Ok(report)
    }

    async fn compact_if(&self, queue: &dyn TaskQueue, removed_any: bool) -> Result<u64, QueueError> {
        if !removed_any {
            return Ok(0);
        }
        Ok(queue.compact().await?.reclaimed_bytes)
    }
}

#[async_trait]
impl<M> Drain for Republisher<M>
where
    M: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Result<DrainReport, StashError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!(republisher = %self.name, "previous cycle still running");
            return Ok(DrainReport::busy(CycleId::generate()));
        };
        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        self.run_cycle(invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, Task};
    use crate::impls::{JsonCodec, RecordingErrorSink, RecordingPublisher};
    use crate::queue::{FileQueueOptions, FileTaskQueue, InMemoryTaskQueue};
    use tempfile::tempdir;

    struct Fixture {
        primary: Arc<dyn TaskQueue>,
        dead_letter: Arc<dyn TaskQueue>,
        publisher: Arc<RecordingPublisher<String>>,
        sink: Arc<RecordingErrorSink>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                primary: Arc::new(InMemoryTaskQueue::new("primary")),
                dead_letter: Arc::new(InMemoryTaskQueue::new("dlq")),
                publisher: Arc::new(RecordingPublisher::new()),
                sink: Arc::new(RecordingErrorSink::new()),
            }
        }

        fn republisher(&self, config: RepublisherConfig) -> Republisher<String> {
            Republisher::<String>::new(
                self.primary.clone(),
                self.publisher.clone(),
                Arc::new(JsonCodec::<String>::new()),
            )
            .with_dead_letter(self.dead_letter.clone(), 2)
            .with_error_sink(self.sink.clone())
            .with_config(config)
        }

        async fn add(&self, event: &str, message: &str) {
            let payload = serde_json::to_string(message).unwrap();
            self.primary.add(Task::new(event, payload)).await.unwrap();
        }
    }

    fn never_dead_letter() -> RepublisherConfig {
        RepublisherConfig {
            dead_letter_every: 0,
            ..RepublisherConfig::default()
        }
    }

    #[tokio::test]
    async fn successful_cycle_removes_the_batch() {
        let fx = Fixture::new();
        fx.add("orders", "a").await;
        fx.add("orders", "b").await;
        let republisher = fx.republisher(never_dead_letter());

        let report = republisher.poll().await.unwrap();

        assert_eq!(report.outcome, DrainOutcome::Delivered);
        assert_eq!(report.source, Some(DrainSource::Primary));
        assert_eq!((report.peeked, report.delivered), (2, 2));
        assert_eq!(fx.primary.size().await.unwrap(), 0);
        assert_eq!(
            fx.publisher.sent(),
            vec![
                ("orders".to_string(), "a".to_string()),
                ("orders".to_string(), "b".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn empty_queue_reports_empty() {
        let fx = Fixture::new();
        let report = fx.republisher(never_dead_letter()).poll().await.unwrap();
        assert_eq!(report.outcome, DrainOutcome::Empty);
        assert_eq!(fx.publisher.calls(), 0);
    }

    #[tokio::test]
    async fn failed_delivery_pushes_back_and_returns_the_error() {
        let fx = Fixture::new();
        fx.add("orders", "a").await;
        fx.publisher.set_failing(true);

        let err = fx.republisher(never_dead_letter()).poll().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientDelivery);
        let left = fx.primary.peek(10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].retry_count(), 1);
    }

    #[tokio::test]
    async fn batch_is_split_by_task_type_and_stops_at_first_failure() {
        let fx = Fixture::new();
        fx.add("orders", "o1").await;
        fx.add("refunds", "r1").await;
        fx.add("orders", "o2").await;
        fx.add("audit", "x1").await;
        fx.publisher.fail_event("refunds");

        let err = fx.republisher(never_dead_letter()).poll().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientDelivery);

        // orders went out as one batch, audit was never attempted
        assert_eq!(fx.publisher.calls(), 2);
        let sent: Vec<String> = fx.publisher.sent().into_iter().map(|(_, m)| m).collect();
        assert_eq!(sent, vec!["o1", "o2"]);

        let left = fx.primary.peek(10).await.unwrap();
        let types: Vec<&str> = left.iter().map(|t| t.task_type()).collect();
        assert_eq!(types, vec!["refunds", "audit"]);
        assert!(left.iter().all(|t| t.retry_count() == 1));
    }

    #[tokio::test]
    async fn undecodable_payload_pushes_back_the_whole_batch() {
        let fx = Fixture::new();
        fx.add("orders", "a").await;
        fx.primary
            .add(Task::new("orders", "not json"))
            .await
            .unwrap();

        let report = fx.republisher(never_dead_letter()).poll().await.unwrap();

        assert_eq!(report.outcome, DrainOutcome::PushedBack);
        assert_eq!(report.retried, 2);
        assert_eq!(fx.publisher.calls(), 0);
        assert_eq!(fx.primary.size().await.unwrap(), 2);
        assert_eq!(fx.sink.kinds(), vec![ErrorKind::Serialization]);
    }

    #[tokio::test]
    async fn slow_publisher_times_out_as_transient_failure() {
        let fx = Fixture::new();
        fx.add("orders", "a").await;
        fx.publisher.set_delay(Duration::from_millis(200));
        let republisher = fx.republisher(RepublisherConfig {
            publish_timeout_ms: 20,
            ..never_dead_letter()
        });

        let err = republisher.poll().await.unwrap_err();
        assert!(matches!(err, StashError::Publish(PublishError::Timeout(20))));
        assert_eq!(fx.primary.peek(1).await.unwrap()[0].retry_count(), 1);
    }

    #[tokio::test]
    async fn dead_letter_queue_is_drained_every_kth_poll() {
        let fx = Fixture::new();
        fx.dead_letter
            .add(Task::new("orders", "\"dead\""))
            .await
            .unwrap();
        let republisher = fx.republisher(RepublisherConfig {
            dead_letter_every: 3,
            ..RepublisherConfig::default()
        });

        let sources = [
            republisher.poll().await.unwrap().source,
            republisher.poll().await.unwrap().source,
            republisher.poll().await.unwrap().source,
        ];
        assert_eq!(
            sources,
            [
                Some(DrainSource::Primary),
                Some(DrainSource::Primary),
                Some(DrainSource::DeadLetter)
            ]
        );
        assert_eq!(fx.dead_letter.size().await.unwrap(), 0);
        assert_eq!(fx.publisher.sent()[0].1, "dead");
    }

    #[tokio::test]
    async fn dead_letter_failures_are_retried_not_escalated_again() {
        let fx = Fixture::new();
        let handle = fx
            .dead_letter
            .add(Task::new("orders", "\"dead\""))
            .await
            .unwrap();
        for _ in 0..5 {
            fx.dead_letter.retry(&[handle]).await.unwrap();
        }
        fx.publisher.set_failing(true);
        let republisher = fx.republisher(RepublisherConfig {
            dead_letter_every: 1,
            ..RepublisherConfig::default()
        });

        assert!(republisher.poll().await.is_err());
        let dead = fx.dead_letter.peek(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retry_count(), 6);
    }

    #[tokio::test]
    async fn peek_failure_is_reported_without_mutation() {
        struct Unreachable;

        #[async_trait]
        impl TaskQueue for Unreachable {
            fn name(&self) -> &str {
                "unreachable"
            }
            async fn add(&self, _: Task) -> Result<TaskHandle, QueueError> {
                Err(QueueError::Unavailable("down".into()))
            }
            async fn add_batch(&self, _: Vec<Task>) -> Result<Vec<TaskHandle>, QueueError> {
                Err(QueueError::Unavailable("down".into()))
            }
            async fn peek(&self, _: usize) -> Result<Vec<QueuedTask>, QueueError> {
                Err(QueueError::Unavailable("down".into()))
            }
            async fn remove(&self, _: &[TaskHandle]) -> Result<u64, QueueError> {
                panic!("remove must not be called")
            }
            async fn retry(&self, _: &[TaskHandle]) -> Result<u64, QueueError> {
                panic!("retry must not be called")
            }
            async fn size(&self) -> Result<u64, QueueError> {
                Err(QueueError::Unavailable("down".into()))
            }
        }

        let sink = Arc::new(RecordingErrorSink::new());
        let republisher = Republisher::<String>::new(
            Arc::new(Unreachable),
            Arc::new(RecordingPublisher::<String>::new()),
            Arc::new(JsonCodec::<String>::new()),
        )
        .with_error_sink(sink.clone());

        let report = republisher.poll().await.unwrap();
        assert_eq!(report.outcome, DrainOutcome::Unavailable);
        assert_eq!(sink.kinds(), vec![ErrorKind::Unavailable]);
    }

    #[tokio::test]
    async fn overlapping_polls_are_skipped() {
        let fx = Fixture::new();
        fx.add("orders", "a").await;
        fx.publisher.set_delay(Duration::from_millis(100));
        let republisher = Arc::new(fx.republisher(never_dead_letter()));

        let first = tokio::spawn({
            let r = republisher.clone();
            async move { r.poll().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = republisher.poll().await.unwrap();

        assert_eq!(second.outcome, DrainOutcome::Busy);
        assert_eq!(second.source, None);
        assert_eq!(
            first.await.unwrap().unwrap().outcome,
            DrainOutcome::Delivered
        );
        assert_eq!(fx.publisher.calls(), 1);
    }

    #[tokio::test]
    async fn task_over_threshold_moves_to_dead_letter_queue() {
        let dir = tempdir().unwrap();
        let primary: Arc<dyn TaskQueue> = Arc::new(
            FileTaskQueue::open(dir.path().join("primary.queue"), FileQueueOptions::default())
                .unwrap(),
        );
        let dead_letter: Arc<dyn TaskQueue> = Arc::new(
            FileTaskQueue::open(dir.path().join("primary.dlq.queue"), FileQueueOptions::default())
                .unwrap(),
        );
        let publisher = Arc::new(RecordingPublisher::<String>::new());
        publisher.set_failing(true);
        let republisher = Republisher::<String>::new(
            primary.clone(),
            publisher.clone(),
            Arc::new(JsonCodec::<String>::new()),
        )
        .with_dead_letter(dead_letter.clone(), 2)
        .with_config(never_dead_letter());

        primary
            .add(Task::new("orders", "\"D\""))
            .await
            .unwrap();

        // three failed cycles bring D to retry_count 3
        for _ in 0..3 {
            assert!(republisher.poll().await.is_err());
        }
        assert_eq!(primary.peek(1).await.unwrap()[0].retry_count(), 3);

        // the next failure escalates it
        assert!(republisher.poll().await.is_err());
        assert!(primary.peek(10).await.unwrap().is_empty());
        let dead = dead_letter.peek(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task(), &Task::new("orders", "\"D\""));
    }
}
