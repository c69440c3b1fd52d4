//! 파이프라인 설정
//!
//! [`PipelineConfig`]는 `streammon-core`의 [`StreamMonConfig`]에서 파이프라인이 쓰는 값만
//! 추려 타입이 있는 형태로 변환한 것입니다. 문자열 열거값은 여기서 파싱되며,
//! 테스트에서는 [`PipelineConfigBuilder`]로 직접 구성합니다.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use streammon_core::config::StreamMonConfig;

use crate::error::StreamPipelineError;
use crate::queue::DropPolicy;
use crate::rule::SwapStrategy;

/// 최대 워커 수
const MAX_WORKER_COUNT: usize = 64;
/// 정상 종료 시 큐 드레인 대기 기본값
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 규칙 YAML 파일 경로
    pub rules_file: PathBuf,
    /// 규칙 교체 전략
    #[serde(skip)]
    pub swap_strategy: SwapStrategy,
    /// 민감 게시물 필터링 여부
    pub filter_sensitive: bool,
    /// 분류 워커 수
    pub worker_count: usize,
    /// hand-off 큐 용량 (0 = 무제한)
    pub queue_capacity: usize,
    /// bounded 큐 드롭 정책
    #[serde(skip)]
    pub drop_policy: DropPolicy,
    /// 감성 분석 활성화 여부
    pub sentiment_enabled: bool,
    /// 텔레메트리 하베스트 주기
    pub harvest_interval: Duration,
    /// 스트림 정상 종료 시 큐가 빌 때까지 기다리는 최대 시간
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rules_file: PathBuf::from("rules.yaml"),
            swap_strategy: SwapStrategy::default(),
            filter_sensitive: true,
            worker_count: 1,
            queue_capacity: 0,
            drop_policy: DropPolicy::default(),
            sentiment_enabled: true,
            harvest_interval: Duration::from_secs(5),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// core 설정에서 파이프라인 설정을 생성합니다.
    ///
    /// # Errors
    /// 교체 전략이나 드롭 정책 문자열을 해석할 수 없는 경우
    pub fn from_core(core: &StreamMonConfig) -> Result<Self, StreamPipelineError> {
        let config = Self {
            rules_file: PathBuf::from(&core.stream.rules_file),
            swap_strategy: core.stream.swap_strategy.parse()?,
            filter_sensitive: core.pipeline.filter_sensitive,
            worker_count: core.pipeline.worker_count,
            queue_capacity: core.pipeline.queue_capacity,
            drop_policy: core.pipeline.queue_drop_policy.parse()?,
            sentiment_enabled: core.sentiment.enabled,
            harvest_interval: Duration::from_secs(core.telemetry.harvest_interval_secs),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), StreamPipelineError> {
        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            return Err(StreamPipelineError::Config {
                field: "worker_count".to_owned(),
                reason: format!("must be 1-{MAX_WORKER_COUNT}"),
            });
        }

        if self.harvest_interval.is_zero() {
            return Err(StreamPipelineError::Config {
                field: "harvest_interval".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.rules_file.as_os_str().is_empty() {
            return Err(StreamPipelineError::Config {
                field: "rules_file".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        Ok(())
    }
}

/// 파이프라인 설정 빌더
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 규칙 파일 경로를 설정합니다.
    pub fn rules_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rules_file = path.into();
        self
    }

    /// 규칙 교체 전략을 설정합니다.
    pub fn swap_strategy(mut self, strategy: SwapStrategy) -> Self {
        self.config.swap_strategy = strategy;
        self
    }

    /// 민감 게시물 필터링 여부를 설정합니다.
    pub fn filter_sensitive(mut self, enabled: bool) -> Self {
        self.config.filter_sensitive = enabled;
        self
    }

    /// 워커 수를 설정합니다.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// 큐 용량과 드롭 정책을 설정합니다.
    pub fn queue_capacity(mut self, capacity: usize, policy: DropPolicy) -> Self {
        self.config.queue_capacity = capacity;
        self.config.drop_policy = policy;
        self
    }

    /// 감성 분석 활성화 여부를 설정합니다.
    pub fn sentiment_enabled(mut self, enabled: bool) -> Self {
        self.config.sentiment_enabled = enabled;
        self
    }

    /// 하베스트 주기를 설정합니다.
    pub fn harvest_interval(mut self, interval: Duration) -> Self {
        self.config.harvest_interval = interval;
        self
    }

    /// 드레인 대기 시간을 설정합니다.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// 설정을 검증하고 생성합니다.
    pub fn build(self) -> Result<PipelineConfig, StreamPipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
