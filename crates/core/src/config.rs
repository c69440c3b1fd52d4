//! 설정 관리: streammon.toml 파싱 및 런타임 설정
//!
//! [`StreamMonConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`STREAMMON_STREAM_BEARER_TOKEN=...` 형식, 그다음 `TWITTER_BEARER_TOKEN` 같은 이전 이름)
//! 3. 설정 파일 (`streammon.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), streammon_core::error::StreamMonError> {
//! use streammon_core::config::StreamMonConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = StreamMonConfig::load("streammon.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = StreamMonConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigError, StreamMonError};

/// 스트림 소스 자격 증명 환경변수
pub const ENV_STREAM_BEARER_TOKEN: &str = "STREAMMON_STREAM_BEARER_TOKEN";
/// 텔레메트리 자격 증명 환경변수
pub const ENV_TELEMETRY_INSERT_KEY: &str = "STREAMMON_TELEMETRY_INSERT_KEY";

/// 이전 배포 호환 변수 이름
pub const ENV_LEGACY_BEARER_TOKEN: &str = "TWITTER_BEARER_TOKEN";
/// 이전 배포 호환 변수 이름
pub const ENV_LEGACY_INSERT_KEY: &str = "NEW_RELIC_INSERT_KEY";
/// 이전 배포 호환 변수 이름
pub const ENV_LEGACY_HARVEST_INTERVAL: &str = "NEW_RELIC_HARVEST_INTERVAL";
/// 이전 배포 호환 변수 이름
pub const ENV_LEGACY_IGNORE_SENSITIVE: &str = "IGNORE_SENSITIVE_TWEETS";
/// 이전 배포 호환 변수 이름
pub const ENV_LEGACY_RUN_SENTIMENT: &str = "RUN_SENTIMENT_ANALYSIS";

/// streammon 통합 설정
///
/// `streammon.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 컴포넌트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMonConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 스트림 소스 설정
    #[serde(default)]
    pub stream: StreamConfig,
    /// 파이프라인 (필터/큐/워커) 설정
    #[serde(default)]
    pub pipeline: PipelineSection,
    /// 감성 분석 설정
    #[serde(default)]
    pub sentiment: SentimentConfig,
    /// 텔레메트리 익스포터 설정
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl StreamMonConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 설정 로딩 순서:
    /// 1. TOML 파일 파싱
    /// 2. 환경변수 오버라이드 적용
    /// 3. 유효성 검증
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StreamMonError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드, 검증 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, StreamMonError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StreamMonError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                StreamMonError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// [`from_file`](Self::from_file)과 같지만 파일이 없으면 기본값을 반환합니다.
    ///
    /// 설정 파일 없이 환경변수만으로 실행하는 배포를 위한 경로입니다.
    /// 파일이 있는데 읽거나 파싱할 수 없으면 에러입니다.
    pub async fn from_file_or_default(path: impl AsRef<Path>) -> Result<Self, StreamMonError> {
        let path = path.as_ref();
        match Self::from_file(path).await {
            Err(StreamMonError::Config(ConfigError::FileNotFound { .. })) => {
                info!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, StreamMonError> {
        toml::from_str(toml_str).map_err(|e| {
            StreamMonError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `STREAMMON_{SECTION}_{FIELD}`
    /// 예: `STREAMMON_PIPELINE_WORKER_COUNT=4`
    pub fn apply_env_overrides(&mut self) {
        // 이전 배포의 변수 이름. 같은 값의 STREAMMON_* 변수가 있으면 그쪽이 이긴다.
        override_string(&mut self.stream.bearer_token, ENV_LEGACY_BEARER_TOKEN);
        override_string(&mut self.telemetry.insert_key, ENV_LEGACY_INSERT_KEY);
        override_u64(
            &mut self.telemetry.harvest_interval_secs,
            ENV_LEGACY_HARVEST_INTERVAL,
        );
        override_bool(
            &mut self.pipeline.filter_sensitive,
            ENV_LEGACY_IGNORE_SENSITIVE,
        );
        override_bool(&mut self.sentiment.enabled, ENV_LEGACY_RUN_SENTIMENT);

        // General
        override_string(&mut self.general.log_level, "STREAMMON_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "STREAMMON_GENERAL_LOG_FORMAT");

        // Stream
        override_string(&mut self.stream.source, "STREAMMON_STREAM_SOURCE");
        override_string(&mut self.stream.bearer_token, ENV_STREAM_BEARER_TOKEN);
        override_string(&mut self.stream.api_base, "STREAMMON_STREAM_API_BASE");
        override_string(&mut self.stream.rules_file, "STREAMMON_STREAM_RULES_FILE");
        override_string(&mut self.stream.replay_path, "STREAMMON_STREAM_REPLAY_PATH");
        override_string(
            &mut self.stream.swap_strategy,
            "STREAMMON_STREAM_SWAP_STRATEGY",
        );
        override_u32(
            &mut self.stream.max_reconnect_attempts,
            "STREAMMON_STREAM_MAX_RECONNECT_ATTEMPTS",
        );
        override_u64(
            &mut self.stream.reconnect_backoff_secs,
            "STREAMMON_STREAM_RECONNECT_BACKOFF_SECS",
        );

        // Pipeline
        override_bool(
            &mut self.pipeline.filter_sensitive,
            "STREAMMON_PIPELINE_FILTER_SENSITIVE",
        );
        override_usize(
            &mut self.pipeline.worker_count,
            "STREAMMON_PIPELINE_WORKER_COUNT",
        );
        override_usize(
            &mut self.pipeline.queue_capacity,
            "STREAMMON_PIPELINE_QUEUE_CAPACITY",
        );
        override_string(
            &mut self.pipeline.queue_drop_policy,
            "STREAMMON_PIPELINE_QUEUE_DROP_POLICY",
        );

        // Sentiment
        override_bool(&mut self.sentiment.enabled, "STREAMMON_SENTIMENT_ENABLED");

        // Telemetry
        override_string(&mut self.telemetry.sink, "STREAMMON_TELEMETRY_SINK");
        override_string(&mut self.telemetry.insert_key, ENV_TELEMETRY_INSERT_KEY);
        override_string(&mut self.telemetry.endpoint, "STREAMMON_TELEMETRY_ENDPOINT");
        override_u64(
            &mut self.telemetry.harvest_interval_secs,
            "STREAMMON_TELEMETRY_HARVEST_INTERVAL_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "STREAMMON_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "STREAMMON_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "STREAMMON_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 자격 증명은 검증하지 않습니다. [`validate_credentials`](Self::validate_credentials)를
    /// 별도로 호출해야 합니다.
    pub fn validate(&self) -> Result<(), StreamMonError> {
        const MAX_WORKER_COUNT: usize = 64;
        const MAX_HARVEST_INTERVAL_SECS: u64 = 3600;

        check_one_of(
            "general.log_level",
            &self.general.log_level,
            &["trace", "debug", "info", "warn", "error"],
        )?;
        check_one_of(
            "general.log_format",
            &self.general.log_format,
            &["json", "pretty"],
        )?;
        check_one_of("stream.source", &self.stream.source, &["twitter", "replay"])?;
        check_one_of(
            "stream.swap_strategy",
            &self.stream.swap_strategy,
            &["delete_then_add", "add_then_delete"],
        )?;

        if self.stream.rules_file.is_empty() {
            return Err(invalid("stream.rules_file", "rules file path must not be empty"));
        }

        if self.stream.source == "replay" && self.stream.replay_path.is_empty() {
            return Err(invalid(
                "stream.replay_path",
                "replay path must not be empty when source is 'replay'",
            ));
        }

        if self.pipeline.worker_count == 0 || self.pipeline.worker_count > MAX_WORKER_COUNT {
            return Err(invalid(
                "pipeline.worker_count",
                &format!("must be 1-{MAX_WORKER_COUNT}"),
            ));
        }

        check_one_of(
            "pipeline.queue_drop_policy",
            &self.pipeline.queue_drop_policy,
            &["oldest", "newest"],
        )?;

        check_one_of("telemetry.sink", &self.telemetry.sink, &["newrelic", "stdout"])?;

        if self.telemetry.harvest_interval_secs == 0
            || self.telemetry.harvest_interval_secs > MAX_HARVEST_INTERVAL_SECS
        {
            return Err(invalid(
                "telemetry.harvest_interval_secs",
                &format!("must be 1-{MAX_HARVEST_INTERVAL_SECS}"),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be non-zero when metrics are enabled"));
        }

        Ok(())
    }

    /// 선택된 백엔드에 필요한 자격 증명이 모두 있는지 확인합니다.
    ///
    /// - `stream.source = "twitter"` → `stream.bearer_token`
    /// - `telemetry.sink = "newrelic"` → `telemetry.insert_key`
    pub fn validate_credentials(&self) -> Result<(), StreamMonError> {
        if self.stream.source == "twitter" && self.stream.bearer_token.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                name: "stream.bearer_token".to_owned(),
                env_key: ENV_STREAM_BEARER_TOKEN.to_owned(),
            }
            .into());
        }

        if self.telemetry.sink == "newrelic" && self.telemetry.insert_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                name: "telemetry.insert_key".to_owned(),
                env_key: ENV_TELEMETRY_INSERT_KEY.to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 스트림 소스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 소스 종류 (twitter, replay)
    pub source: String,
    /// 스트림 API bearer 토큰 (twitter 소스 필수)
    pub bearer_token: String,
    /// 스트림 API 기본 URL
    pub api_base: String,
    /// 규칙 YAML 파일 경로
    pub rules_file: String,
    /// 재생할 JSON-lines 파일 경로 (replay 소스 필수)
    pub replay_path: String,
    /// 규칙 교체 전략 (delete_then_add, add_then_delete)
    pub swap_strategy: String,
    /// 재연결 최대 시도 횟수
    pub max_reconnect_attempts: u32,
    /// 재연결 백오프 단위 (초, 시도마다 선형 증가)
    pub reconnect_backoff_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: "twitter".to_owned(),
            bearer_token: String::new(),
            api_base: "https://api.twitter.com".to_owned(),
            rules_file: "rules.yaml".to_owned(),
            replay_path: String::new(),
            swap_strategy: "delete_then_add".to_owned(),
            max_reconnect_attempts: 5,
            reconnect_backoff_secs: 5,
        }
    }
}

/// 파이프라인 설정 (필터, hand-off 큐, 워커 풀)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// 민감 게시물 필터링 여부
    pub filter_sensitive: bool,
    /// 분류 워커 수
    pub worker_count: usize,
    /// hand-off 큐 용량 (0 = 무제한)
    pub queue_capacity: usize,
    /// bounded 큐 드롭 정책 (oldest, newest)
    pub queue_drop_policy: String,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            filter_sensitive: true,
            worker_count: 1,
            queue_capacity: 0,
            queue_drop_policy: "oldest".to_owned(),
        }
    }
}

/// 감성 분석 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    /// 감성 분석 활성화 여부
    pub enabled: bool,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// 텔레메트리 익스포터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// 싱크 종류 (newrelic, stdout)
    pub sink: String,
    /// New Relic insert 키 (newrelic 싱크 필수)
    pub insert_key: String,
    /// 로그 수집 엔드포인트
    pub endpoint: String,
    /// 하베스트 주기 (초)
    pub harvest_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sink: "newrelic".to_owned(),
            insert_key: String::new(),
            endpoint: "https://log-api.newrelic.com/log/v1".to_owned(),
            harvest_interval_secs: 5,
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 메트릭 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 바인드 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
        }
    }
}

// --- 검증 헬퍼 ---

fn invalid(field: &str, reason: &str) -> StreamMonError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
    .into()
}

fn check_one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), StreamMonError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            field,
            &format!("must be one of: {}", allowed.join(", ")),
        ))
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match parse_flag(&val) {
            Some(parsed) => *target = parsed,
            None => warn!(
                env_key,
                value = val.as_str(),
                expected = "bool",
                "failed to parse env var, ignoring"
            ),
        }
    }
}

/// `true`/`false` 외에 `1`/`0`, `yes`/`no`, `on`/`off`를 대소문자 구분 없이 받는다.
fn parse_flag(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}
