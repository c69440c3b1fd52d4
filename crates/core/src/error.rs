//! 에러 타입: 도메인별 에러 정의

/// streammon 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum StreamMonError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// 필수 자격 증명 누락
    #[error("missing credential '{name}': set it in the config file or via {env_key}")]
    MissingCredential { name: String, env_key: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline is not running")]
    NotRunning,

    /// 스트림 구독 실패 (소스의 재시도 한도 소진)
    #[error("stream subscription failed: {0}")]
    SubscriptionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_mentions_env_key() {
        let err = ConfigError::MissingCredential {
            name: "stream.bearer_token".to_owned(),
            env_key: "STREAMMON_STREAM_BEARER_TOKEN".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("stream.bearer_token"));
        assert!(msg.contains("STREAMMON_STREAM_BEARER_TOKEN"));
    }

    #[test]
    fn config_error_converts_to_top_level() {
        let err: StreamMonError = ConfigError::ParseFailed {
            reason: "bad toml".to_owned(),
        }
        .into();
        assert!(matches!(err, StreamMonError::Config(_)));
        assert!(err.to_string().contains("bad toml"));
    }

    #[test]
    fn pipeline_error_converts_to_top_level() {
        let err: StreamMonError = PipelineError::AlreadyRunning.into();
        assert!(matches!(
            err,
            StreamMonError::Pipeline(PipelineError::AlreadyRunning)
        ));
    }
}
