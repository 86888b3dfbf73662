//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **StashBuilder**: 設定からキューを開いてワイヤリング
//! - **FallbackPublisher**: 配送失敗時にローカルキューへ退避
//! - **Republisher**: 退避したタスクの再配送（drain loop）
//! - **DeadLetterEscalation**: pushback 時の DLQ 退避判定
//! - **DrainScheduler**: 複数の Drain の周期実行

pub mod builder;
pub mod escalation;
pub mod fallback;
pub mod republisher;
pub mod scheduler;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, Stash, StashBuilder};
pub use self::escalation::{DeadLetterEscalation, RetryAll};
pub use self::fallback::{Delivery, FallbackPublisher};
pub use self::republisher::{Republisher, RepublisherConfig};
pub use self::scheduler::{CycleSummary, DrainScheduler, SchedulerConfig, SchedulerHandle};
pub use self::status::QueueStatus;
