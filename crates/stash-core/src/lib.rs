//! stash-core
//!
//! Durable local fallback queue for messages that could not be delivered to a
//! remote channel, plus the retry / dead-letter policy and the drain loop that
//! redelivers them later.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Task, TaskHandle, ids, errors, reports）
//! - **ports**: 抽象化レイヤー（TaskQueue, RemotePublisher, MessageCodec, ErrorSink, Escalation, Drain）
//! - **queue**: TaskQueue の実装（FileTaskQueue, InMemoryTaskQueue）
//! - **app**: アプリケーションロジック（FallbackPublisher, Republisher, DrainScheduler, StashBuilder）
//! - **impls**: ports の実装（JsonCodec, TracingErrorSink, RecordingPublisher）
//! - **config**: 設定（StashConfig）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;

pub use app::{
    Delivery, DrainScheduler, FallbackPublisher, Republisher, Stash, StashBuilder,
};
pub use config::StashConfig;
pub use domain::{ErrorKind, StashError, Task};
pub use queue::{FileTaskQueue, InMemoryTaskQueue};
