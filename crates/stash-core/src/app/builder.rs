//! StashBuilder - 設定からキューを開いてワイヤリングする
//!
//! # 学習ポイント
//! - 起動時検証（Fail-fast 設計）: 設定の不備は build() で BuildError になる
//! - primary / DLQ のバックエンドは構築時に選ぶ（strategy）
//! - FallbackPublisher / Republisher は同じキューを共有する

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::{DrainScheduler, FallbackPublisher, QueueStatus, Republisher};
use crate::config::{BackendKind, ConfigError, StashConfig};
use crate::domain::QueueError;
use crate::impls::TracingErrorSink;
use crate::ports::{ErrorSink, MessageCodec, RemotePublisher, TaskQueue};
use crate::queue::{FileQueueOptions, FileTaskQueue, InMemoryTaskQueue};

/// BuildError は構築時のエラー
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open queue: {0}")]
    Queue(#[from] QueueError),
}

/// StashBuilder は設定から Stash を構築
///
/// # 使用例
/// ```ignore
/// let stash = StashBuilder::new(StashConfig::from_file("stash.yaml")?)
///     .error_sink(Arc::new(TracingErrorSink))
///     .build()?;
/// let fallback = stash.fallback_publisher::<String>(publisher.clone(), codec.clone());
/// let mut scheduler = stash.scheduler();
/// scheduler.register(Arc::new(stash.republisher(publisher, codec)));
/// ```
pub struct StashBuilder {
    config: StashConfig,
    error_sink: Arc<dyn ErrorSink>,
}

impl StashBuilder {
    pub fn new(config: StashConfig) -> Self {
        Self {
            config,
            error_sink: Arc::new(TracingErrorSink),
        }
    }

    pub fn error_sink(mut self, error_sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = error_sink;
        self
    }

    /// Validate the config and open the queues. File-backed queues are
    /// scanned (and repaired if needed) here.
    pub fn build(self) -> Result<Stash, BuildError> {
        self.config.validate()?;

        let primary = self.open_queue(&self.config.name, &self.config.primary_path())?;
        let dead_letter = match &self.config.dead_letter {
            Some(_) => Some(self.open_queue(
                &format!("{}.dlq", self.config.name),
                &self.config.dead_letter_path(),
            )?),
            None => None,
        };

        info!(
            name = %self.config.name,
            backend = ?self.config.backend,
            dead_letter = dead_letter.is_some(),
            "stash ready"
        );
        Ok(Stash {
            config: self.config,
            primary,
            dead_letter,
            error_sink: self.error_sink,
        })
    }

    fn open_queue(
        &self,
        name: &str,
        path: &std::path::Path,
    ) -> Result<Arc<dyn TaskQueue>, QueueError> {
        let queue: Arc<dyn TaskQueue> = match self.config.backend {
            BackendKind::File => Arc::new(FileTaskQueue::open(
                path,
                FileQueueOptions {
                    name: Some(name.to_string()),
                    sync_writes: self.config.sync_writes,
                },
            )?),
            BackendKind::Memory => Arc::new(InMemoryTaskQueue::new(name)),
        };
        Ok(queue)
    }
}

/// Stash は primary / DLQ と、それを使うコンポーネントの工場
pub struct Stash {
    config: StashConfig,
    primary: Arc<dyn TaskQueue>,
    dead_letter: Option<Arc<dyn TaskQueue>>,
    error_sink: Arc<dyn ErrorSink>,
}

impl Stash {
    pub fn config(&self) -> &StashConfig {
        &self.config
    }

    pub fn primary(&self) -> &Arc<dyn TaskQueue> {
        &self.primary
    }

    pub fn dead_letter(&self) -> Option<&Arc<dyn TaskQueue>> {
        self.dead_letter.as_ref()
    }

    pub fn fallback_publisher<M>(
        &self,
        publisher: Arc<dyn RemotePublisher<M>>,
        codec: Arc<dyn MessageCodec<M>>,
    ) -> FallbackPublisher<M>
    where
        M: Send + Sync + 'static,
    {
        FallbackPublisher::new(publisher, codec, Arc::clone(&self.primary))
    }

    pub fn republisher<M>(
        &self,
        publisher: Arc<dyn RemotePublisher<M>>,
        codec: Arc<dyn MessageCodec<M>>,
    ) -> Republisher<M>
    where
        M: Send + Sync + 'static,
    {
        let republisher = Republisher::new(Arc::clone(&self.primary), publisher, codec)
            .with_name(self.config.name.clone())
            .with_error_sink(Arc::clone(&self.error_sink))
            .with_config(self.config.republisher.clone());
        match (&self.dead_letter, &self.config.dead_letter) {
            (Some(queue), Some(dl)) => republisher.with_dead_letter(Arc::clone(queue), dl.threshold),
            _ => republisher,
        }
    }

    /// An empty scheduler sharing this stash's error sink and settings.
    pub fn scheduler(&self) -> DrainScheduler {
        DrainScheduler::new(self.config.scheduler.clone())
            .with_error_sink(Arc::clone(&self.error_sink))
    }

    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let live = self.primary.size().await?;
        let dead_lettered = match &self.dead_letter {
            Some(queue) => Some(queue.size().await?),
            None => None,
        };
        Ok(QueueStatus {
            name: self.config.name.clone(),
            backend: self.config.backend,
            live,
            dead_lettered,
        })
    }
}
