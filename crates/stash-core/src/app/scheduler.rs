//! DrainScheduler - 登録された Drain の fan-out / fan-in
//!
//! # 学習ポイント
//! - グローバルな登録リストではなく、スケジューラが `Vec<Arc<dyn Drain>>` を所有する
//! - Semaphore で同時実行数を制限し、共通の deadline で待つ
//! - 失敗・panic・タイムアウトはすべて ErrorSink へ（兄弟の Drain には影響しない）
//! - 周期実行は tokio task で行い、shutdown は grace 付きで待つ

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::{DrainReport, StashError};
use crate::impls::TracingErrorSink;
use crate::ports::{Drain, ErrorSink};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of drains polled at the same time.
    pub max_concurrency: usize,
    /// How long one cycle may take before unfinished polls are abandoned.
    pub cycle_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            cycle_timeout_ms: 30_000,
        }
    }
}

/// What happened during one `run_once`.
#[derive(Debug, Default)]
pub struct CycleSummary {
    pub reports: Vec<DrainReport>,
    pub failed: usize,
    pub timed_out: usize,
}

pub struct DrainScheduler {
    drains: Vec<Arc<dyn Drain>>,
    error_sink: Arc<dyn ErrorSink>,
    config: SchedulerConfig,
}

impl DrainScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            drains: Vec::new(),
            error_sink: Arc::new(TracingErrorSink),
            config,
        }
    }

    pub fn with_error_sink(mut self, error_sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = error_sink;
        self
    }

    pub fn register(&mut self, drain: Arc<dyn Drain>) {
        debug!(drain = %drain.name(), "registered drain");
        self.drains.push(drain);
    }

    pub fn len(&self) -> usize {
        self.drains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drains.is_empty()
    }

    /// Poll every registered drain once and wait for all of them, up to the
    /// cycle timeout. Never fails: problems go to the error sink.
    pub async fn run_once(&self) -> CycleSummary {
        let deadline = Instant::now() + Duration::from_millis(self.config.cycle_timeout_ms);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let handles: Vec<(String, JoinHandle<Result<DrainReport, StashError>>)> = self
            .drains
            .iter()
            .map(|drain| {
                let drain = Arc::clone(drain);
                let semaphore = Arc::clone(&semaphore);
                let name = drain.name().to_string();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| StashError::Scheduler(e.to_string()))?;
                    drain.poll().await
                });
                (name, handle)
            })
            .collect();

        let mut summary = CycleSummary::default();
        for (name, mut handle) in handles {
            let error = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(report))) => {
                    summary.reports.push(report);
                    continue;
                }
                Ok(Ok(Err(e))) => e,
                Ok(Err(join_error)) => {
                    StashError::Scheduler(format!("drain {name} did not finish: {join_error}"))
                }
                Err(_) => {
                    handle.abort();
                    summary.timed_out += 1;
                    StashError::Scheduler(format!(
                        "drain {name} exceeded cycle timeout of {} ms",
                        self.config.cycle_timeout_ms
                    ))
                }
            };
            summary.failed += 1;
            self.error_sink.report(&name, &error);
        }

        debug!(
            drains = self.drains.len(),
            completed = summary.reports.len(),
            failed = summary.failed,
            "drain cycle finished"
        );
        summary
    }

    /// Run a cycle every `interval` on a background task until shut down.
    pub fn spawn(self, interval: Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(drains = self.drains.len(), ?interval, "drain scheduler started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            info!("drain scheduler stopped");
        });
        SchedulerHandle { shutdown_tx, join }
    }
}

pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop scheduling new cycles. A cycle already running keeps going.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop and wait up to `grace` for the in-flight cycle to finish.
    /// The loop is aborted if it does not.
    pub async fn shutdown(mut self, grace: Duration) -> Result<(), StashError> {
        self.request_shutdown();
        match tokio::time::timeout(grace, &mut self.join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StashError::Scheduler(format!("scheduler task failed: {e}"))),
            Err(_) => {
                warn!(?grace, "drain cycle did not finish within grace period, aborting");
                self.join.abort();
                Err(StashError::Scheduler(format!(
                    "shutdown grace of {} ms exceeded",
                    grace.as_millis()
                )))
            }
        }
    }
}
