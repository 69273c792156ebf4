//! SNI 수집기 에러 타입

use lanaudit_core::error::{LanauditError, PipelineError};

/// SNI 수집기 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum SniError {
    /// 캡처 핸들 열기 실패 (인터페이스 없음, 권한 부족 등)
    #[error("cannot open capture on '{interface}': {reason}")]
    CaptureOpen { interface: String, reason: String },

    /// BPF 필터 컴파일/적용 실패
    #[error("invalid bpf filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },
}

impl From<SniError> for LanauditError {
    fn from(err: SniError) -> Self {
        LanauditError::Pipeline(PipelineError::InitFailed(err.to_string()))
    }
}
