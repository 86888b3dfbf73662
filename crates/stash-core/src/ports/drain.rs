//! Drain port - スケジューラから周期的に呼ばれる処理単位

use async_trait::async_trait;

use crate::domain::{DrainReport, StashError};

/// Drain は 1 回の poll で 1 サイクル分の再配送を行う
///
/// # 設計原則
/// - 専用スレッドを持たない（外部のスケジューラが呼ぶ）
/// - メッセージ型 `M` を消すための object-safe な trait
#[async_trait]
pub trait Drain: Send + Sync {
    fn name(&self) -> &str;

    async fn poll(&self) -> Result<DrainReport, StashError>;
}
