//! NetFlow 수집기 에러 타입

use lanaudit_core::error::{LanauditError, PipelineError};

/// NetFlow 수집기 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum NetflowError {
    /// UDP 소켓 바인드 실패
    #[error("cannot bind udp listener on {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// 다운스트림 채널이 닫힘
    #[error("observation channel closed")]
    ChannelClosed,
}

/// 데이터그램 디코딩 에러
///
/// 디코딩 실패는 해당 데이터그램을 버리는 것으로 끝나며 파이프라인을
/// 멈추지 않습니다.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 헤더를 채우지 못할 만큼 짧은 데이터그램
    #[error("datagram too short: {got} bytes, need {need}")]
    TooShort { got: usize, need: usize },

    /// 알 수 없는 NetFlow 버전
    #[error("unsupported netflow version {0}")]
    UnsupportedVersion(u16),

    /// 구조가 깨진 데이터그램
    #[error("malformed datagram: {0}")]
    Malformed(&'static str),
}

impl From<NetflowError> for LanauditError {
    fn from(err: NetflowError) -> Self {
        LanauditError::Pipeline(PipelineError::InitFailed(err.to_string()))
    }
}
