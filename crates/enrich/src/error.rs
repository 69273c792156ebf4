//! 보강 파이프라인 에러 타입
//!
//! 역방향 DNS와 외부 조회 실패는 파이프라인을 멈추지 않습니다 —
//! 호출부에서 warn으로 기록하고 알아낸 필드만으로 진행합니다.

use lanaudit_core::error::{LanauditError, PipelineError};

/// 보강 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// DNS 서버 주소가 `host:port` 형태가 아님
    #[error("invalid dns server address '{0}'")]
    InvalidDnsServer(String),

    /// 역방향 DNS 조회 실패
    #[error("reverse lookup failed for {ip}: {reason}")]
    Dns { ip: String, reason: String },

    /// 외부 호스트 조회 실패
    #[error("host intel lookup failed for {ip}: {reason}")]
    Intel { ip: String, reason: String },
}

impl From<EnrichError> for LanauditError {
    fn from(err: EnrichError) -> Self {
        LanauditError::Pipeline(PipelineError::InitFailed(err.to_string()))
    }
}
