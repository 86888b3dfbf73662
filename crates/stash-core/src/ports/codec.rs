//! MessageCodec port - メッセージと payload 文字列の相互変換
//!
//! # 実装
//! - **JsonCodec**: serde_json ベース（`impls::json_codec`）

use crate::domain::CodecError;

/// MessageCodec は `M` を Task の payload に変換する
///
/// decode の失敗は一時的なもの（デプロイ中のスキーマ不一致など）として扱われ、
/// メッセージは破棄されずに pushback されます。
pub trait MessageCodec<M>: Send + Sync {
    fn serialize(&self, message: &M) -> Result<String, CodecError>;

    fn deserialize(&self, payload: &str) -> Result<M, CodecError>;
}
