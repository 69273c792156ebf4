//! 저장소 에러 타입
//!
//! 조회 API가 404로 변환하는 not-found 계열과, 기동을 막는
//! 열기/손상 계열을 구분합니다.

use lanaudit_core::error::LanauditError;

/// 저장소 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 요청한 IP의 메타데이터가 없음
    #[error("ip not found: {0}")]
    IpNotFound(String),

    /// 요청한 IP의 통신 이력이 없음
    #[error("actions not found: {0}")]
    ActionNotFound(String),

    /// 로그 파일을 열 수 없음
    #[error("cannot open store at {path}: {reason}")]
    Open { path: String, reason: String },

    /// 영속 값 인코딩 실패
    #[error("encode failed for key '{key}': {reason}")]
    Encode { key: String, reason: String },

    /// 영속 값 디코딩 실패
    #[error("decode failed for key '{key}': {reason}")]
    Decode { key: String, reason: String },

    /// 병합기가 이미 정지됨 (shutdown 중 쓰기 시도)
    #[error("merge operator stopped for key '{0}'")]
    OperatorStopped(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// not-found 계열인지 확인합니다.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::IpNotFound(_) | Self::ActionNotFound(_))
    }
}

impl From<StoreError> for LanauditError {
    fn from(err: StoreError) -> Self {
        LanauditError::Storage(err.to_string())
    }
}
