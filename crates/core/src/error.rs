//! 에러 타입 — 도메인별 에러 정의

/// lanaudit 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LanauditError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 필수 설정 누락 (예: 외부 조회 API 키)
    #[error("missing required value for '{field}'")]
    Missing { field: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 모듈이 이미 실행 중
    #[error("module already running")]
    AlreadyRunning,

    /// 모듈이 실행 중이 아님
    #[error("module not running")]
    NotRunning,

    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 모듈 초기화 실패
    #[error("module init failed: {0}")]
    InitFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_names_field() {
        let err = ConfigError::InvalidValue {
            field: "network-cidr".to_owned(),
            reason: "not a CIDR".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("network-cidr"));
        assert!(msg.contains("not a CIDR"));
    }

    #[test]
    fn pipeline_error_converts_to_top_level() {
        let err: LanauditError = PipelineError::AlreadyRunning.into();
        assert!(matches!(err, LanauditError::Pipeline(_)));
    }

    #[test]
    fn io_error_converts_to_top_level() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: LanauditError = io.into();
        assert!(err.to_string().contains("gone"));
    }
}
