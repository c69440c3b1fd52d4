//! 생명주기 코디네이터 -- 컴포넌트 조립과 시작/종료 순서
//!
//! # 시작 순서
//! 익스포터 시작 → 초기 규칙 로드 → 워커 시작 → 수집기 구독 → 리로드 컨트롤러 시작.
//! 중간 단계가 실패하면 이미 시작한 컴포넌트를 역순으로 정리합니다.
//!
//! # 종료 순서
//! 리로드 컨트롤러 정지 → 수집기 정지 → (스트림 정상 종료 시) 큐 드레인 →
//! 워커 정지 및 join → 남은 큐 항목 폐기 → 익스포터 `flush_and_stop`.
//! 각 단계는 한 번만 실행되며 반복 호출은 no-op입니다.
//!
//! # 사용 예시
//! ```ignore
//! let mut pipeline = StreamPipelineBuilder::new()
//!     .config(config)
//!     .source(Arc::new(source))
//!     .classifier(Arc::new(LexiconClassifier::new()))
//!     .exporter(Arc::new(exporter))
//!     .build()?;
//!
//! let reload = pipeline.reload_handle();
//! pipeline.start().await?;
//! pipeline.run_until(shutdown_signal()).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use streammon_core::error::StreamMonError;
use streammon_core::pipeline::{HealthStatus, Pipeline};

use crate::config::PipelineConfig;
use crate::error::StreamPipelineError;
use crate::exporter::TelemetryExporter;
use crate::ingestor::{IngestSnapshot, StreamIngestor};
use crate::queue::HandoffQueue;
use crate::reload::{ReloadController, ReloadHandle, reload_channel};
use crate::rule::{RuleLoader, RuleSet};
use crate::sentiment::SentimentClassifier;
use crate::source::StreamSource;
use crate::worker::{WorkerPool, WorkerSnapshot};

/// 드레인 중 큐 확인 주기
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 무제한 큐에서 성능 저하로 보고하는 적체량
const QUEUE_BACKLOG_DEGRADED: usize = 10_000;

/// 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 스트림이 끝났음 (정상 종료 또는 재시도 한도 소진)
    StreamEnded,
    /// 외부 종료 요청 (시그널 등)
    Signal,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StreamEnded => write!(f, "stream_ended"),
            Self::Signal => write!(f, "signal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordinatorState {
    Initialized,
    Running,
    Stopped,
}

/// 스트림 모니터링 파이프라인
pub struct StreamPipeline<S: StreamSource, C, E> {
    config: PipelineConfig,
    state: CoordinatorState,
    queue: Arc<HandoffQueue>,
    exporter: Arc<E>,
    ingestor: StreamIngestor<S>,
    workers: WorkerPool<C, E>,
    reload: ReloadController<S>,
    reload_handle: ReloadHandle,
    initial_rules: Option<RuleSet>,
}

impl<S, C, E> StreamPipeline<S, C, E>
where
    S: StreamSource,
    C: SentimentClassifier,
    E: TelemetryExporter,
{
    /// 리로드 요청 핸들
    pub fn reload_handle(&self) -> ReloadHandle {
        self.reload_handle.clone()
    }

    /// 현재 상태 이름
    pub fn state_name(&self) -> &'static str {
        match self.state {
            CoordinatorState::Initialized => "initialized",
            CoordinatorState::Running => "running",
            CoordinatorState::Stopped => "stopped",
        }
    }

    /// 핸드오프 큐에 남은 항목 수
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// 수집 통계
    pub fn ingest_stats(&self) -> IngestSnapshot {
        self.ingestor.stats()
    }

    /// 워커 통계
    pub fn worker_stats(&self) -> WorkerSnapshot {
        self.workers.stats()
    }

    /// 설정
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    async fn launch(&mut self) -> Result<(), StreamPipelineError> {
        if self.state == CoordinatorState::Running {
            return Err(StreamPipelineError::AlreadyRunning("stream pipeline"));
        }
        if self.state == CoordinatorState::Stopped {
            return Err(StreamPipelineError::NotRunning("stopped stream pipeline"));
        }

        info!("starting stream pipeline");

        // 1. 익스포터
        self.exporter.start()?;

        // 2. 초기 규칙
        let rules = match self.initial_rules.take() {
            Some(rules) => rules,
            None => match RuleLoader::load_file(&self.config.rules_file).await {
                Ok(rules) => rules,
                Err(e) => {
                    self.rollback().await;
                    return Err(e);
                }
            },
        };

        // 3. 워커
        if let Err(e) = self.workers.start() {
            self.rollback().await;
            return Err(e);
        }

        // 4. 수집기
        if let Err(e) = self.ingestor.start(rules).await {
            self.rollback().await;
            return Err(e);
        }

        // 5. 리로드 컨트롤러
        if let Err(e) = self.reload.start() {
            // 수집기는 이미 구독 중이므로 정상 종료 경로로 정리합니다.
            self.shutdown(ShutdownReason::Signal).await?;
            return Err(e);
        }

        self.state = CoordinatorState::Running;
        info!(
            workers = self.workers.worker_count(),
            sentiment = self.config.sentiment_enabled,
            "stream pipeline started"
        );
        Ok(())
    }

    async fn rollback(&mut self) {
        warn!("stream pipeline start failed, rolling back");
        self.workers.stop().await;
        if let Err(e) = self.exporter.flush_and_stop().await {
            warn!(error = %e, "exporter flush failed during rollback");
        }
        self.state = CoordinatorState::Stopped;
    }

    /// 모든 컴포넌트를 종료 순서대로 정지합니다. 멱등입니다.
    ///
    /// 수집기의 구독이 재시도 한도 소진으로 실패했다면, 나머지 종료를 마친 뒤 그 에러를
    /// 반환합니다.
    pub async fn shutdown(&mut self, reason: ShutdownReason) -> Result<(), StreamPipelineError> {
        if self.state == CoordinatorState::Stopped {
            return Ok(());
        }
        self.state = CoordinatorState::Stopped;
        info!(reason = %reason, "stopping stream pipeline");

        // 1. 리로드 컨트롤러
        self.reload.stop().await;

        // 2. 수집기
        let stream_result = self.ingestor.stop().await;

        // 3. 스트림이 정상적으로 끝났다면 큐를 비울 때까지 기다립니다.
        if reason == ShutdownReason::StreamEnded && stream_result.is_ok() {
            self.drain_queue().await;
        }

        // 4. 워커 (꺼낸 항목은 끝까지 처리)
        self.workers.stop().await;

        // 5. 남은 항목 폐기
        let discarded = self.queue.clear();
        if discarded > 0 {
            warn!(discarded, "discarded unprocessed items at shutdown");
        }

        // 6. 익스포터
        let export_result = self.exporter.flush_and_stop().await;
        if let Err(e) = &export_result {
            warn!(error = %e, "final telemetry flush failed");
        }

        let worker_stats = self.workers.stats();
        info!(
            processed = worker_stats.processed,
            records = worker_stats.records,
            "stream pipeline stopped"
        );

        stream_result?;
        export_result
    }

    async fn drain_queue(&self) {
        let pending = self.queue.len();
        if pending == 0 {
            return;
        }
        info!(pending, "draining hand-off queue");

        let queue = Arc::clone(&self.queue);
        let drained = tokio::time::timeout(self.config.drain_timeout, async move {
            while !queue.is_empty() {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.queue.len(),
                timeout_secs = self.config.drain_timeout.as_secs(),
                "drain timed out"
            );
        }
    }

    /// `shutdown`이 완료되거나 스트림이 끝날 때까지 실행한 뒤 종료합니다.
    ///
    /// # Errors
    /// - 파이프라인이 실행 중이 아닌 경우
    /// - 구독이 실패했거나 마지막 전송이 실패한 경우
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<ShutdownReason, StreamPipelineError>
    where
        F: Future<Output = ()>,
    {
        if self.state != CoordinatorState::Running {
            return Err(StreamPipelineError::NotRunning("stream pipeline"));
        }

        let terminated = self.ingestor.terminated();
        let reason = tokio::select! {
            () = shutdown => ShutdownReason::Signal,
            () = terminated.cancelled() => ShutdownReason::StreamEnded,
        };

        self.shutdown(reason).await?;
        Ok(reason)
    }

    fn health(&self) -> HealthStatus {
        match self.state {
            CoordinatorState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            CoordinatorState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
            CoordinatorState::Running => {
                if !self.ingestor.is_running() {
                    return HealthStatus::Degraded(format!(
                        "stream subscription {}",
                        self.ingestor.state_name()
                    ));
                }

                let depth = self.queue.len();
                let backlog = match self.queue.capacity() {
                    Some(capacity) => depth * 10 >= capacity * 9,
                    None => depth >= QUEUE_BACKLOG_DEGRADED,
                };
                if backlog {
                    HealthStatus::Degraded(format!("hand-off queue backlog: {depth} items"))
                } else {
                    HealthStatus::Healthy
                }
            }
        }
    }
}

impl<S, C, E> Pipeline for StreamPipeline<S, C, E>
where
    S: StreamSource,
    C: SentimentClassifier,
    E: TelemetryExporter,
{
    async fn start(&mut self) -> Result<(), StreamMonError> {
        self.launch().await.map_err(StreamMonError::from)
    }

    async fn stop(&mut self) -> Result<(), StreamMonError> {
        self.shutdown(ShutdownReason::Signal)
            .await
            .map_err(StreamMonError::from)
    }

    async fn health_check(&self) -> HealthStatus {
        self.health()
    }
}

/// 파이프라인 빌더
pub struct StreamPipelineBuilder<S, C, E> {
    config: PipelineConfig,
    source: Option<Arc<S>>,
    classifier: Option<Arc<C>>,
    exporter: Option<Arc<E>>,
    initial_rules: Option<RuleSet>,
}

impl<S, C, E> StreamPipelineBuilder<S, C, E>
where
    S: StreamSource,
    C: SentimentClassifier,
    E: TelemetryExporter,
{
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            source: None,
            classifier: None,
            exporter: None,
            initial_rules: None,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 스트림 소스를 지정합니다.
    pub fn source(mut self, source: Arc<S>) -> Self {
        self.source = Some(source);
        self
    }

    /// 감성 분류기를 지정합니다. 설정에서 감성 분석이 꺼져 있으면 사용하지 않습니다.
    pub fn classifier(mut self, classifier: Arc<C>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// 텔레메트리 익스포터를 지정합니다.
    pub fn exporter(mut self, exporter: Arc<E>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// 규칙 파일 대신 사용할 초기 규칙을 지정합니다.
    pub fn initial_rules(mut self, rules: RuleSet) -> Self {
        self.initial_rules = Some(rules);
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// # Errors
    /// - 설정 검증 실패
    /// - 소스/익스포터 누락, 감성 분석이 켜져 있는데 분류기 누락
    pub fn build(self) -> Result<StreamPipeline<S, C, E>, StreamPipelineError> {
        self.config.validate()?;

        let source = self.source.ok_or_else(|| missing("source"))?;
        let exporter = self.exporter.ok_or_else(|| missing("exporter"))?;
        let classifier = if self.config.sentiment_enabled {
            Some(self.classifier.ok_or_else(|| missing("classifier"))?)
        } else {
            None
        };

        let queue = Arc::new(if self.config.queue_capacity > 0 {
            HandoffQueue::bounded(self.config.queue_capacity, self.config.drop_policy)
        } else {
            HandoffQueue::unbounded()
        });

        let ingestor = StreamIngestor::new(
            source,
            Arc::clone(&queue),
            self.config.filter_sensitive,
            self.config.swap_strategy,
        );
        let workers = WorkerPool::new(
            Arc::clone(&queue),
            classifier,
            Arc::clone(&exporter),
            self.config.worker_count,
        )?;

        let (reload_handle, reload_rx) = reload_channel();
        let reload = ReloadController::new(
            self.config.rules_file.clone(),
            ingestor.rule_manager(),
            reload_rx,
        );

        Ok(StreamPipeline {
            config: self.config,
            state: CoordinatorState::Initialized,
            queue,
            exporter,
            ingestor,
            workers,
            reload,
            reload_handle,
            initial_rules: self.initial_rules,
        })
    }
}

impl<S, C, E> Default for StreamPipelineBuilder<S, C, E>
where
    S: StreamSource,
    C: SentimentClassifier,
    E: TelemetryExporter,
{
    fn default() -> Self {
        Self::new()
    }
}

fn missing(component: &str) -> StreamPipelineError {
    StreamPipelineError::Config {
        field: component.to_owned(),
        reason: "must be provided to the pipeline builder".to_owned(),
    }
}
