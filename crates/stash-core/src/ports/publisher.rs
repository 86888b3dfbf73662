//! RemotePublisher port - リモートのメッセージチャネル
//!
//! ネットワークブローカーのクライアントはこのクレートの外にあります。
//! ここでは「失敗しうる不透明な境界」としてだけ扱います。

use async_trait::async_trait;

use crate::domain::PublishError;

/// RemotePublisher は `M` を event 名付きでリモートに送る
///
/// # 設計原則
/// - `post_batch` は全体が成功するか、全体が失敗するかのどちらか
/// - 失敗の扱い（キューへの退避、pushback）は呼び出し側が決める
#[async_trait]
pub trait RemotePublisher<M>: Send + Sync
where
    M: Send + Sync + 'static,
{
    async fn post(&self, message: &M, event: &str) -> Result<(), PublishError>;

    async fn post_batch(&self, messages: &[M], event: &str) -> Result<(), PublishError>;
}
