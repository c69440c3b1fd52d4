//! 스트림 소스 -- 규칙 기반 실시간 피드 구독
//!
//! [`StreamSource`] trait은 규칙 관리와 장기 구독을 추상화합니다.
//! 구독 중 발생하는 모든 이벤트는 하나의 순차 채널([`StreamEvent`])로 전달되며,
//! 수신 측([`StreamIngestor`](crate::ingestor::StreamIngestor))은 이를 하나씩 처리합니다.
//!
//! # 구현체
//! - [`TwitterStreamSource`]: Twitter v2 filtered stream (HTTP, newline-delimited JSON)
//! - [`ReplayStreamSource`]: JSON-lines 파일 재생 (오프라인 실행, 테스트)
//! - [`MockStreamSource`](crate::testing::MockStreamSource): 테스트용 스크립트 소스

pub mod payload;
pub mod replay;
pub mod twitter;

pub use payload::{Delivery, IncludedUser, PostMetrics, RawItem};
pub use replay::ReplayStreamSource;
pub use twitter::TwitterStreamSource;

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use streammon_core::config::StreamConfig;

use crate::error::StreamPipelineError;
use crate::rule::{InstalledRule, Rule, RuleUpdateSummary};

/// 구독 중 전달되는 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// 연결 수립 (재연결 포함)
    Connected,
    /// 연결 수준 에러 (소스가 재시도 중)
    Error(String),
    /// 스트림 delivery
    Delivery(Delivery),
}

/// 스트림 소스 trait
///
/// 규칙 조회/삭제/추가와 구독을 제공합니다.
/// `subscribe`는 취소 토큰이 취소되거나 스트림이 정상 종료되면 `Ok(())`를,
/// 소스 자체의 재시도 한도를 모두 소진하면 `Err`를 반환합니다.
pub trait StreamSource: Send + Sync + 'static {
    /// 소스 이름 (로그용)
    fn name(&self) -> &str;

    /// 현재 설치된 규칙을 조회합니다.
    fn fetch_rules(
        &self,
    ) -> impl Future<Output = Result<Vec<InstalledRule>, StreamPipelineError>> + Send;

    /// 주어진 ID의 규칙을 삭제합니다.
    fn delete_rules(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<RuleUpdateSummary, StreamPipelineError>> + Send;

    /// 규칙을 추가합니다. 각 규칙은 논리 태그와 함께 설치됩니다.
    fn add_rules(
        &self,
        rules: &[Rule],
    ) -> impl Future<Output = Result<RuleUpdateSummary, StreamPipelineError>> + Send;

    /// 스트림을 구독하고 이벤트를 `events`로 전달합니다.
    fn subscribe(
        &self,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<(), StreamPipelineError>> + Send;
}

/// 설정으로 선택되는 소스
///
/// `StreamSource`는 `impl Future`를 반환하므로 trait 객체로 쓸 수 없습니다.
/// 데몬은 이 enum으로 런타임에 구현체를 선택합니다.
#[derive(Debug)]
pub enum ConfiguredSource {
    /// Twitter v2 filtered stream
    Twitter(TwitterStreamSource),
    /// JSON-lines 재생
    Replay(ReplayStreamSource),
}

impl ConfiguredSource {
    /// `[stream]` 설정으로 소스를 만듭니다.
    ///
    /// # Errors
    /// - 알 수 없는 소스 이름
    /// - replay 소스인데 `replay_path`가 비어 있는 경우
    /// - HTTP 클라이언트를 구성할 수 없는 경우
    pub fn from_config(stream: &StreamConfig) -> Result<Self, StreamPipelineError> {
        match stream.source.as_str() {
            "twitter" => {
                let source = TwitterStreamSource::new(&stream.api_base, &stream.bearer_token)?
                    .with_reconnect(
                        stream.max_reconnect_attempts,
                        Duration::from_secs(stream.reconnect_backoff_secs),
                    );
                Ok(Self::Twitter(source))
            }
            "replay" => {
                if stream.replay_path.trim().is_empty() {
                    return Err(StreamPipelineError::Config {
                        field: "stream.replay_path".to_owned(),
                        reason: "required when stream.source is 'replay'".to_owned(),
                    });
                }
                Ok(Self::Replay(ReplayStreamSource::new(&stream.replay_path)))
            }
            other => Err(StreamPipelineError::Config {
                field: "stream.source".to_owned(),
                reason: format!("unknown source '{other}'"),
            }),
        }
    }
}

impl StreamSource for ConfiguredSource {
    fn name(&self) -> &str {
        match self {
            Self::Twitter(s) => s.name(),
            Self::Replay(s) => s.name(),
        }
    }

    async fn fetch_rules(&self) -> Result<Vec<InstalledRule>, StreamPipelineError> {
        match self {
            Self::Twitter(s) => s.fetch_rules().await,
            Self::Replay(s) => s.fetch_rules().await,
        }
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<RuleUpdateSummary, StreamPipelineError> {
        match self {
            Self::Twitter(s) => s.delete_rules(ids).await,
            Self::Replay(s) => s.delete_rules(ids).await,
        }
    }

    async fn add_rules(&self, rules: &[Rule]) -> Result<RuleUpdateSummary, StreamPipelineError> {
        match self {
            Self::Twitter(s) => s.add_rules(rules).await,
            Self::Replay(s) => s.add_rules(rules).await,
        }
    }

    async fn subscribe(
        &self,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(), StreamPipelineError> {
        match self {
            Self::Twitter(s) => s.subscribe(events, cancel).await,
            Self::Replay(s) => s.subscribe(events, cancel).await,
        }
    }
}
