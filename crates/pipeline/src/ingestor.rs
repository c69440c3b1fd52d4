//! 스트림 수집기 -- 구독, 규칙 관리, 조기 필터링
//!
//! [`StreamIngestor`]는 스트림 소스 구독을 소유하고, 전달되는 이벤트를 순차적으로 처리해
//! 통과한 게시물을 [`HandoffQueue`]에 넣습니다.
//!
//! # 필터 순서
//! 1. 전송 계층 에러 → error 로그 후 버림
//! 2. 게시물이 아닌 페이로드 → debug 로그 후 버림
//! 3. 빈 본문 → debug 로그 후 버림
//! 4. 민감 게시물 (필터 활성 시) → debug 로그 후 버림
//! 5. 매칭 규칙이 없는 게시물 → debug 로그 후 버림
//! 6. 나머지 → 작성 시각이 없으면 수신 시각을 기록하고 큐에 추가 (블로킹 없음)
//!
//! # 규칙 교체
//! [`RuleManager`]가 규칙 교체를 담당합니다. 교체 요청은 내부 async mutex로 직렬화되며,
//! delivery 처리 경로는 이 mutex를 잡지 않으므로 교체 중에도 수집은 계속됩니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use streammon_core::metrics as m;

use crate::error::StreamPipelineError;
use crate::queue::{HandoffQueue, PushOutcome};
use crate::rule::{RuleSet, RuleUpdateSummary, SwapPlan, SwapStrategy};
use crate::source::{Delivery, RawItem, StreamEvent, StreamSource};

/// 소스 → 수집기 이벤트 채널 용량
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// delivery가 버려진 이유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    /// 전송 계층 에러
    TransportError,
    /// 게시물로 인식할 수 없음
    Malformed,
    /// 빈 본문
    EmptyText,
    /// 민감 게시물
    Sensitive,
    /// 매칭된 규칙 없음
    NoMatchingRules,
}

impl FilterReason {
    /// 메트릭 레이블 값
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportError => "error",
            Self::Malformed => "malformed",
            Self::EmptyText => "empty_text",
            Self::Sensitive => "sensitive",
            Self::NoMatchingRules => "no_matching_rules",
        }
    }
}

/// delivery 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 큐에 추가됨
    Accepted,
    /// 정책에 의해 버려짐
    Filtered(FilterReason),
    /// bounded 큐가 가득 차 거부됨
    Dropped,
}

/// delivery를 필터 규칙에 따라 분류합니다.
pub fn screen(delivery: Delivery, filter_sensitive: bool) -> Result<RawItem, FilterReason> {
    match delivery {
        Delivery::Error(errors) => {
            error!(?errors, "stream source delivered an error");
            Err(FilterReason::TransportError)
        }
        Delivery::Other(reason) => {
            debug!(reason = %reason, "ignoring non-post delivery");
            Err(FilterReason::Malformed)
        }
        Delivery::Post(item) if item.text.trim().is_empty() => {
            debug!(id = %item.id, "ignoring post without text");
            Err(FilterReason::EmptyText)
        }
        Delivery::Post(item) if filter_sensitive && item.possibly_sensitive => {
            debug!(id = %item.id, "ignoring sensitive post");
            Err(FilterReason::Sensitive)
        }
        Delivery::Post(item) if item.matching_rule_tags.is_empty() => {
            debug!(id = %item.id, "ignoring post without matching rules");
            Err(FilterReason::NoMatchingRules)
        }
        Delivery::Post(item) => Ok(item),
    }
}

/// 수집 통계 카운터
#[derive(Debug, Default)]
pub struct IngestStats {
    deliveries: AtomicU64,
    accepted: AtomicU64,
    filtered: AtomicU64,
    dropped: AtomicU64,
}

/// [`IngestStats`]의 특정 시점 값
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSnapshot {
    /// 수신한 delivery 수
    pub deliveries: u64,
    /// 큐에 추가된 게시물 수
    pub accepted: u64,
    /// 필터링된 delivery 수
    pub filtered: u64,
    /// 큐 용량 초과로 거부된 게시물 수
    pub dropped: u64,
}

impl IngestStats {
    /// 현재 값을 읽습니다.
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            deliveries: self.deliveries.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// 이벤트 처리기 -- delivery 태스크에서 순차적으로 호출됩니다.
#[derive(Clone)]
pub struct DeliveryHandler {
    queue: Arc<HandoffQueue>,
    filter_sensitive: bool,
    stats: Arc<IngestStats>,
}

impl DeliveryHandler {
    /// 새 처리기를 생성합니다.
    pub fn new(queue: Arc<HandoffQueue>, filter_sensitive: bool) -> Self {
        Self {
            queue,
            filter_sensitive,
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// 통계 카운터
    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// 스트림 이벤트를 처리합니다. delivery가 아니면 `None`.
    pub fn handle_event(&self, event: StreamEvent) -> Option<DeliveryOutcome> {
        match event {
            StreamEvent::Connected => {
                info!("stream connected");
                None
            }
            StreamEvent::Error(reason) => {
                warn!(reason = %reason, "stream connection error");
                None
            }
            StreamEvent::Delivery(delivery) => Some(self.on_delivery(delivery)),
        }
    }

    /// delivery 하나를 필터링하고 통과하면 큐에 넣습니다.
    pub fn on_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::INGEST_DELIVERIES_TOTAL).increment(1);

        let mut item = match screen(delivery, self.filter_sensitive) {
            Ok(item) => item,
            Err(reason) => {
                self.stats.filtered.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::INGEST_FILTERED_TOTAL, m::LABEL_REASON => reason.as_str())
                    .increment(1);
                return DeliveryOutcome::Filtered(reason);
            }
        };

        if item.created_at.is_none() {
            item.created_at = Some(Utc::now());
        }

        debug!(id = %item.id, tags = ?item.matching_rule_tags, "accepted post");
        match self.queue.push(item) {
            PushOutcome::Rejected => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::Dropped
            }
            PushOutcome::Queued | PushOutcome::DisplacedOldest => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::INGEST_ACCEPTED_TOTAL).increment(1);
                DeliveryOutcome::Accepted
            }
        }
    }
}

/// 규칙 교체 담당 -- 복제해 리로드 컨트롤러와 공유합니다.
pub struct RuleManager<S> {
    source: Arc<S>,
    active: Arc<Mutex<Option<RuleSet>>>,
    strategy: SwapStrategy,
}

impl<S> Clone for RuleManager<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            active: Arc::clone(&self.active),
            strategy: self.strategy,
        }
    }
}

impl<S: StreamSource> RuleManager<S> {
    /// 새 규칙 관리자를 생성합니다.
    pub fn new(source: Arc<S>, strategy: SwapStrategy) -> Self {
        Self {
            source,
            active: Arc::new(Mutex::new(None)),
            strategy,
        }
    }

    /// 교체 전략
    pub fn strategy(&self) -> SwapStrategy {
        self.strategy
    }

    /// 현재 활성 규칙 집합
    pub async fn active(&self) -> Option<RuleSet> {
        self.active.lock().await.clone()
    }

    /// 활성 규칙을 `rules`로 교체합니다.
    ///
    /// 실패하면 이전 규칙 집합을 활성 상태로 유지합니다. 소스 쪽 규칙은
    /// 부분적으로 바뀌었을 수 있으며, 다음 교체가 이를 정리합니다.
    pub async fn update_rules(
        &self,
        rules: RuleSet,
    ) -> Result<RuleUpdateSummary, StreamPipelineError> {
        let mut active = self.active.lock().await;

        match self.apply(&rules).await {
            Ok(summary) => {
                metrics::counter!(m::RULES_UPDATES_TOTAL, m::LABEL_RESULT => "success")
                    .increment(1);
                metrics::gauge!(m::RULES_ACTIVE).set(rules.len() as f64);
                info!(
                    source = self.source.name(),
                    strategy = %self.strategy,
                    tags = ?rules.tags(),
                    deleted = summary.deleted,
                    created = summary.created,
                    not_created = summary.not_created,
                    "rule set updated"
                );
                *active = Some(rules);
                Ok(summary)
            }
            Err(e) => {
                metrics::counter!(m::RULES_UPDATES_TOTAL, m::LABEL_RESULT => "failure")
                    .increment(1);
                Err(e)
            }
        }
    }

    async fn apply(&self, rules: &RuleSet) -> Result<RuleUpdateSummary, StreamPipelineError> {
        let installed = self.source.fetch_rules().await?;
        let plan = SwapPlan::compute(self.strategy, &installed, rules);
        debug!(
            installed = installed.len(),
            delete = plan.delete_ids.len(),
            add = plan.add.len(),
            "computed rule swap plan"
        );

        let mut summary = RuleUpdateSummary::default();
        match plan.strategy {
            SwapStrategy::DeleteThenAdd => {
                if !plan.delete_ids.is_empty() {
                    summary = summary.merge(self.source.delete_rules(&plan.delete_ids).await?);
                }
                if !plan.add.is_empty() {
                    summary = summary.merge(self.source.add_rules(&plan.add).await?);
                }
            }
            SwapStrategy::AddThenDelete => {
                if !plan.add.is_empty() {
                    summary = summary.merge(self.source.add_rules(&plan.add).await?);
                }
                if !plan.delete_ids.is_empty() {
                    summary = summary.merge(self.source.delete_rules(&plan.delete_ids).await?);
                }
            }
        }
        Ok(summary)
    }
}

/// 수집기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngestorState {
    Initialized,
    Running,
    Stopped,
}

/// 스트림 수집기
pub struct StreamIngestor<S: StreamSource> {
    source: Arc<S>,
    handler: DeliveryHandler,
    rules: RuleManager<S>,
    state: IngestorState,
    cancel: CancellationToken,
    terminated: CancellationToken,
    subscription: Option<JoinHandle<Result<(), StreamPipelineError>>>,
    delivery: Option<JoinHandle<()>>,
}

impl<S: StreamSource> StreamIngestor<S> {
    /// 새 수집기를 생성합니다.
    pub fn new(
        source: Arc<S>,
        queue: Arc<HandoffQueue>,
        filter_sensitive: bool,
        strategy: SwapStrategy,
    ) -> Self {
        Self {
            rules: RuleManager::new(Arc::clone(&source), strategy),
            handler: DeliveryHandler::new(queue, filter_sensitive),
            source,
            state: IngestorState::Initialized,
            cancel: CancellationToken::new(),
            terminated: CancellationToken::new(),
            subscription: None,
            delivery: None,
        }
    }

    /// 초기 규칙을 설치하고 구독을 시작합니다.
    ///
    /// # Errors
    /// - 이미 실행 중인 경우
    /// - 초기 규칙 설치에 실패한 경우
    pub async fn start(&mut self, initial: RuleSet) -> Result<(), StreamPipelineError> {
        if self.state == IngestorState::Running {
            return Err(StreamPipelineError::AlreadyRunning("stream ingestor"));
        }

        self.rules.update_rules(initial).await?;

        self.cancel = CancellationToken::new();
        self.terminated = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let handler = self.handler.clone();
        self.delivery = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler.handle_event(event);
            }
            debug!("delivery task finished");
        }));

        let source = Arc::clone(&self.source);
        let cancel = self.cancel.clone();
        let terminated = self.terminated.clone();
        self.subscription = Some(tokio::spawn(async move {
            let result = source.subscribe(tx, cancel).await;
            match &result {
                Ok(()) => info!(source = source.name(), "stream subscription ended"),
                Err(e) => error!(source = source.name(), error = %e, "stream subscription failed"),
            }
            terminated.cancel();
            result
        }));

        self.state = IngestorState::Running;
        info!(source = self.source.name(), "stream ingestor started");
        Ok(())
    }

    /// 구독을 닫습니다. 멱등이며, 분류 작업을 기다리지 않습니다.
    ///
    /// 구독이 재시도 한도 소진으로 이미 실패했다면 그 에러를 한 번 반환합니다.
    pub async fn stop(&mut self) -> Result<(), StreamPipelineError> {
        if self.state != IngestorState::Running {
            return Ok(());
        }

        self.cancel.cancel();

        let mut result = Ok(());
        if let Some(handle) = self.subscription.take() {
            result = handle.await.unwrap_or_else(|e| {
                Err(StreamPipelineError::Channel(format!(
                    "subscription task panicked: {e}"
                )))
            });
        }
        if let Some(handle) = self.delivery.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "delivery task panicked");
        }

        self.state = IngestorState::Stopped;
        let stats = self.handler.stats().snapshot();
        info!(
            deliveries = stats.deliveries,
            accepted = stats.accepted,
            filtered = stats.filtered,
            dropped = stats.dropped,
            "stream ingestor stopped"
        );
        result
    }

    /// 활성 규칙을 교체합니다. [`RuleManager::update_rules`] 참고.
    pub async fn update_rules(
        &self,
        rules: RuleSet,
    ) -> Result<RuleUpdateSummary, StreamPipelineError> {
        self.rules.update_rules(rules).await
    }

    /// 리로드 컨트롤러와 공유할 규칙 관리자
    pub fn rule_manager(&self) -> RuleManager<S> {
        self.rules.clone()
    }

    /// 구독이 끝나면 (정상 종료든 실패든) 취소되는 토큰
    pub fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    /// 수집 통계
    pub fn stats(&self) -> IngestSnapshot {
        self.handler.stats().snapshot()
    }

    /// 구독 중인지 확인합니다.
    pub fn is_running(&self) -> bool {
        self.state == IngestorState::Running && !self.terminated.is_cancelled()
    }

    /// 상태 이름 (health check용)
    pub fn state_name(&self) -> &'static str {
        match self.state {
            IngestorState::Initialized => "initialized",
            IngestorState::Running if self.terminated.is_cancelled() => "ended",
            IngestorState::Running => "running",
            IngestorState::Stopped => "stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Rule;
    use crate::testing::MockStreamSource;

    fn post(id: &str, text: &str, sensitive: bool) -> Delivery {
        let mut item = RawItem::with_text(id, text);
        item.possibly_sensitive = sensitive;
        item.matching_rule_tags = vec!["brand".to_owned()];
        Delivery::Post(item)
    }

    fn rules(pairs: &[(&str, &str)]) -> RuleSet {
        RuleSet::new(pairs.iter().map(|(t, v)| Rule::new(*t, *v)).collect()).unwrap()
    }

    #[test]
    fn filters_in_order() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let handler = DeliveryHandler::new(Arc::clone(&queue), true);

        assert_eq!(
            handler.on_delivery(Delivery::Error(vec!["boom".to_owned()])),
            DeliveryOutcome::Filtered(FilterReason::TransportError)
        );
        assert_eq!(
            handler.on_delivery(Delivery::Other("keep-alive".to_owned())),
            DeliveryOutcome::Filtered(FilterReason::Malformed)
        );
        assert_eq!(
            handler.on_delivery(post("1", "", true)),
            DeliveryOutcome::Filtered(FilterReason::EmptyText)
        );
        assert_eq!(
            handler.on_delivery(post("2", "hello", true)),
            DeliveryOutcome::Filtered(FilterReason::Sensitive)
        );
        assert_eq!(
            handler.on_delivery(post("3", "hello", false)),
            DeliveryOutcome::Accepted
        );

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop().unwrap().id, "3");

        let stats = handler.stats().snapshot();
        assert_eq!(stats.deliveries, 5);
        assert_eq!(stats.filtered, 4);
        assert_eq!(stats.accepted, 1);
    }

    #[test]
    fn post_without_tags_is_filtered() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let handler = DeliveryHandler::new(Arc::clone(&queue), true);
        let item = RawItem::with_text("1", "acme rocks");

        assert_eq!(
            handler.on_delivery(Delivery::Post(item)),
            DeliveryOutcome::Filtered(FilterReason::NoMatchingRules)
        );
        assert!(queue.is_empty());
        assert_eq!(handler.stats().snapshot().filtered, 1);
    }

    #[test]
    fn missing_created_at_is_stamped_on_receipt() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let handler = DeliveryHandler::new(Arc::clone(&queue), true);

        let before = Utc::now().timestamp_millis();
        handler.on_delivery(post("1", "acme rocks", false));
        let after = Utc::now().timestamp_millis();

        // 큐 대기 시간
        std::thread::sleep(std::time::Duration::from_millis(50));

        let item = queue.try_pop().unwrap();
        let records = crate::record::build_records(&item, None);
        assert!(records[0].timestamp >= before);
        assert!(records[0].timestamp <= after);
    }

    #[test]
    fn existing_created_at_is_kept() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let handler = DeliveryHandler::new(Arc::clone(&queue), true);
        let Delivery::Post(mut item) = post("1", "acme rocks", false) else {
            unreachable!()
        };
        item.created_at = chrono::DateTime::from_timestamp_millis(1_646_136_000_000);

        handler.on_delivery(Delivery::Post(item));
        let popped = queue.try_pop().unwrap();
        assert_eq!(
            popped.created_at.map(|t| t.timestamp_millis()),
            Some(1_646_136_000_000)
        );
    }

    #[test]
    fn sensitive_passes_when_filter_disabled() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let handler = DeliveryHandler::new(Arc::clone(&queue), false);
        assert_eq!(
            handler.on_delivery(post("1", "hello", true)),
            DeliveryOutcome::Accepted
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn whitespace_only_text_is_empty() {
        let handler = DeliveryHandler::new(Arc::new(HandoffQueue::unbounded()), true);
        assert_eq!(
            handler.on_delivery(post("1", "   ", false)),
            DeliveryOutcome::Filtered(FilterReason::EmptyText)
        );
    }

    #[test]
    fn connection_events_are_not_deliveries() {
        let handler = DeliveryHandler::new(Arc::new(HandoffQueue::unbounded()), true);
        assert_eq!(handler.handle_event(StreamEvent::Connected), None);
        assert_eq!(
            handler.handle_event(StreamEvent::Error("reset".to_owned())),
            None
        );
    }

    #[tokio::test]
    async fn update_rules_twice_is_idempotent() {
        let source = Arc::new(MockStreamSource::new());
        let manager = RuleManager::new(Arc::clone(&source), SwapStrategy::DeleteThenAdd);
        let set = rules(&[("brand", "acme")]);

        manager.update_rules(set.clone()).await.unwrap();
        manager.update_rules(set.clone()).await.unwrap();

        assert_eq!(source.active_tags(), vec!["brand"]);
        assert_eq!(manager.active().await, Some(set));
    }

    #[tokio::test]
    async fn add_then_delete_never_empties_rules() {
        let source = Arc::new(MockStreamSource::new());
        let manager = RuleManager::new(Arc::clone(&source), SwapStrategy::AddThenDelete);

        manager
            .update_rules(rules(&[("brand", "acme")]))
            .await
            .unwrap();
        manager
            .update_rules(rules(&[("brand2", "acme OR acme-co")]))
            .await
            .unwrap();

        let history = source.rule_history();
        assert!(history.iter().skip(1).all(|tags| !tags.is_empty()));
        assert_eq!(source.active_tags(), vec!["brand2"]);
    }

    #[tokio::test]
    async fn failed_update_keeps_previous_rules() {
        let source = Arc::new(MockStreamSource::new());
        let manager = RuleManager::new(Arc::clone(&source), SwapStrategy::DeleteThenAdd);
        let first = rules(&[("brand", "acme")]);
        manager.update_rules(first.clone()).await.unwrap();

        source.fail_rule_calls(true);
        assert!(
            manager
                .update_rules(rules(&[("other", "globex")]))
                .await
                .is_err()
        );
        assert_eq!(manager.active().await, Some(first));
    }

    #[tokio::test]
    async fn start_and_stop_ingestor() {
        let source = Arc::new(MockStreamSource::new());
        source.push_event(StreamEvent::Connected);
        source.push_event(StreamEvent::Delivery(post("1", "hello", false)));
        source.push_event(StreamEvent::Delivery(post("2", "", false)));

        let queue = Arc::new(HandoffQueue::unbounded());
        let mut ingestor =
            StreamIngestor::new(source, Arc::clone(&queue), true, SwapStrategy::default());
        assert_eq!(ingestor.state_name(), "initialized");

        ingestor.start(rules(&[("brand", "acme")])).await.unwrap();
        assert!(matches!(
            ingestor.start(RuleSet::empty()).await,
            Err(StreamPipelineError::AlreadyRunning(_))
        ));

        // 스크립트가 끝나면 mock 소스는 정상 종료합니다.
        ingestor.terminated().cancelled().await;
        ingestor.stop().await.unwrap();
        ingestor.stop().await.unwrap();

        assert_eq!(ingestor.state_name(), "stopped");
        assert_eq!(queue.len(), 1);
        assert_eq!(ingestor.stats().deliveries, 2);
    }

    #[tokio::test]
    async fn subscription_failure_is_reported_by_stop() {
        let source = Arc::new(MockStreamSource::new());
        source.fail_subscription("gave up");

        let mut ingestor = StreamIngestor::new(
            source,
            Arc::new(HandoffQueue::unbounded()),
            true,
            SwapStrategy::default(),
        );
        ingestor.start(RuleSet::empty()).await.unwrap();
        ingestor.terminated().cancelled().await;
        assert!(!ingestor.is_running());

        let err = ingestor.stop().await.unwrap_err();
        assert!(matches!(
            err,
            StreamPipelineError::SubscriptionExhausted { .. }
        ));
        // 두 번째 stop은 no-op
        ingestor.stop().await.unwrap();
    }
}
