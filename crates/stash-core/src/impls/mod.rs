//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **JsonCodec**: serde_json ベースの MessageCodec
//! - **TracingErrorSink / RecordingErrorSink**: ErrorSink
//! - **RecordingPublisher**: 開発・テスト用の RemotePublisher
//!
//! キューのバックエンド（FileTaskQueue / InMemoryTaskQueue）は `queue` にあります。
//! 本番のブローカークライアントはこのクレートの外で RemotePublisher を実装します。

pub mod error_sink;
pub mod json_codec;
pub mod recording_publisher;

// 主要な型を再エクスポート
pub use self::error_sink::{RecordingErrorSink, ReportedError, TracingErrorSink};
pub use self::json_codec::JsonCodec;
pub use self::recording_publisher::RecordingPublisher;
