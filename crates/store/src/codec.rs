//! 영속 값 코덱
//!
//! 값은 self-describing한 JSON 바이트로 영속됩니다. 필드 추가에
//! 관대하고, 없는 optional 필드까지 그대로 왕복됩니다.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// 값을 영속 바이트로 인코딩합니다.
pub(crate) fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Encode {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}

/// 영속 바이트를 값으로 디코딩합니다.
pub(crate) fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Decode {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}
