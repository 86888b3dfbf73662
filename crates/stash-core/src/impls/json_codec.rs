//! JsonCodec - serde_json ベースの MessageCodec

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::CodecError;
use crate::ports::MessageCodec;

/// JsonCodec は `M` を JSON 文字列として payload に格納する
pub struct JsonCodec<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> JsonCodec<M> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for JsonCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MessageCodec<M> for JsonCodec<M>
where
    M: Serialize + DeserializeOwned,
{
    fn serialize(&self, message: &M) -> Result<String, CodecError> {
        serde_json::to_string(message).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn deserialize(&self, payload: &str) -> Result<M, CodecError> {
        serde_json::from_str(payload).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
