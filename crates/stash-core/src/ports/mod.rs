//! Ports - 抽象化レイヤー
//!
//! 外部システム（リモートブローカー、シリアライザ、スケジューラ）と
//! キューのバックエンドへのインターフェースを定義します。

pub mod codec;
pub mod drain;
pub mod error_sink;
pub mod escalation;
pub mod publisher;
pub mod task_queue;

pub use self::codec::MessageCodec;
pub use self::drain::Drain;
pub use self::error_sink::ErrorSink;
pub use self::escalation::Escalation;
pub use self::publisher::RemotePublisher;
pub use self::task_queue::{Compaction, TaskQueue};
