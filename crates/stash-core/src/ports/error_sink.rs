//! ErrorSink port - 投げずに報告するエラーの受け口
//!
//! # 実装
//! - **TracingErrorSink**: tracing の error! で出力（本番用）
//! - **RecordingErrorSink**: メモリに溜める（テスト用）

use crate::domain::StashError;

/// ErrorSink は drain サイクルやスケジューラで発生したエラーを受け取る
///
/// `origin` はエラーを出したコンポーネント（republisher 名など）です。
pub trait ErrorSink: Send + Sync {
    fn report(&self, origin: &str, error: &StashError);
}
