//! 파이프라인 에러 타입
//!
//! [`StreamPipelineError`]는 수집/분류/전송 파이프라인 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<StreamPipelineError> for StreamMonError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use streammon_core::error::{ConfigError, PipelineError, StreamMonError};

/// 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum StreamPipelineError {
    /// 규칙 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 규칙 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 규칙 유효성 검증 실패
    #[error("rule validation error: tag '{tag}': {reason}")]
    RuleValidation {
        /// 문제가 된 규칙 태그
        tag: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 스트림 소스 에러 (HTTP, 인증, 응답 형식 등)
    #[error("stream source error: {0}")]
    Source(String),

    /// 재시도 한도를 모두 소진한 구독 실패
    #[error("subscription failed after {attempts} attempts: {reason}")]
    SubscriptionExhausted {
        /// 시도 횟수
        attempts: u32,
        /// 마지막 실패 사유
        reason: String,
    },

    /// 감성 분류기 에러
    #[error("classifier error: {0}")]
    Classifier(String),

    /// 텔레메트리 익스포터/싱크 에러
    #[error("exporter error: {0}")]
    Exporter(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// 이미 실행 중인 컴포넌트를 다시 시작하려는 경우
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// 실행 중이 아닌 컴포넌트에 실행 중 동작을 요청한 경우
    #[error("{0} is not running")]
    NotRunning(&'static str),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP 클라이언트 에러
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON 직렬화/역직렬화 에러
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StreamPipelineError> for StreamMonError {
    fn from(err: StreamPipelineError) -> Self {
        match err {
            StreamPipelineError::Config { field, reason } => {
                StreamMonError::Config(ConfigError::InvalidValue { field, reason })
            }
            StreamPipelineError::SubscriptionExhausted { .. } => {
                StreamMonError::Pipeline(PipelineError::SubscriptionFailed(err.to_string()))
            }
            StreamPipelineError::AlreadyRunning(_) => {
                StreamMonError::Pipeline(PipelineError::AlreadyRunning)
            }
            StreamPipelineError::NotRunning(_) => StreamMonError::Pipeline(PipelineError::NotRunning),
            other => StreamMonError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
