//! 분류 워커 풀
//!
//! 각 워커는 핸드오프 큐에서 항목을 꺼내 정규화 → 감성 분류 → 레코드 팬아웃 → 제출을
//! 순서대로 수행합니다.
//!
//! # 백오프
//! 큐가 비어 있으면 대기 시간을 [`BACKOFF_STEP`]씩 늘리며 [`BACKOFF_CEILING`]을 넘지
//! 않습니다. 항목을 꺼내면 0으로 돌아갑니다. 대기는 취소 토큰으로 즉시 깨어나므로
//! 종료 신호는 백오프 한 주기 안에 관찰됩니다.
//!
//! # 종료
//! 취소는 대기 지점에서만 확인합니다. 이미 꺼낸 항목은 끝까지 처리한 뒤 종료합니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use streammon_core::metrics as m;

use crate::error::StreamPipelineError;
use crate::exporter::TelemetryExporter;
use crate::queue::HandoffQueue;
use crate::record::build_records;
use crate::sentiment::{Presentation, SentimentClassifier, SentimentResult, TextNormalizer};
use crate::source::RawItem;

/// 빈 큐를 만날 때마다 늘어나는 대기 시간
pub const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// 최대 대기 시간
pub const BACKOFF_CEILING: Duration = Duration::from_secs(5);

/// 빈 큐 대기 시간 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    /// 대기 시간 0에서 시작합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 대기 시간
    pub fn current(&self) -> Duration {
        self.current
    }

    /// 큐가 비어 있었음을 기록하고 늘어난 대기 시간을 반환합니다.
    pub fn on_empty(&mut self) -> Duration {
        self.current = (self.current + BACKOFF_STEP).min(BACKOFF_CEILING);
        self.current
    }

    /// 항목을 꺼냈으므로 대기 시간을 0으로 되돌립니다.
    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

/// `delay` 동안 기다리거나 취소되면 즉시 깨어납니다. 취소되었으면 `true`.
async fn wait_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}

/// 워커 통계 (모든 워커가 공유)
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    records: AtomicU64,
    classification_failures: AtomicU64,
}

/// 워커 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSnapshot {
    /// 처리한 항목 수
    pub processed: u64,
    /// 제출한 레코드 수
    pub records: u64,
    /// 분류 실패 수
    pub classification_failures: u64,
}

impl WorkerStats {
    /// 현재 값을 읽습니다.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            classification_failures: self.classification_failures.load(Ordering::Relaxed),
        }
    }
}

/// 워커 하나가 항목을 처리하는 데 필요한 공유 상태
struct Worker<C, E> {
    id: usize,
    queue: Arc<HandoffQueue>,
    classifier: Option<Arc<C>>,
    normalizer: Arc<TextNormalizer>,
    exporter: Arc<E>,
    stats: Arc<WorkerStats>,
}

impl<C: SentimentClassifier, E: TelemetryExporter> Worker<C, E> {
    async fn run(self, cancel: CancellationToken) {
        debug!(worker = self.id, "classification worker started");
        let mut backoff = Backoff::new();
        loop {
            if wait_or_cancel(&cancel, backoff.current()).await {
                break;
            }
            let Some(item) = self.queue.try_pop() else {
                backoff.on_empty();
                continue;
            };
            backoff.reset();
            self.process(item).await;
        }
        debug!(worker = self.id, "classification worker stopped");
    }

    async fn process(&self, item: RawItem) {
        let sentiment = self.classify(&item).await;
        let records = build_records(&item, sentiment.as_ref());
        let count = records.len() as u64;
        for record in records {
            self.exporter.submit(record);
        }

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        self.stats.records.fetch_add(count, Ordering::Relaxed);
        metrics::counter!(m::WORKER_ITEMS_PROCESSED_TOTAL).increment(1);
    }

    /// 감성 분류가 꺼져 있거나 분류에 실패하면 `None`
    async fn classify(&self, item: &RawItem) -> Option<Presentation> {
        let classifier = self.classifier.as_ref()?;
        let normalized = self.normalizer.normalize(&item.text);

        let result = if normalized.is_empty() {
            Ok(SentimentResult::unknown())
        } else {
            let classifier = Arc::clone(classifier);
            tokio::task::spawn_blocking(move || classifier.classify(&normalized))
                .await
                .unwrap_or_else(|e| {
                    Err(StreamPipelineError::Classifier(format!(
                        "classification task failed: {e}"
                    )))
                })
        };

        match result {
            Ok(result) => Some(Presentation::from_result(&result)),
            Err(e) => {
                self.stats
                    .classification_failures
                    .fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::WORKER_CLASSIFICATION_FAILURES_TOTAL).increment(1);
                warn!(
                    worker = self.id,
                    item_id = %item.id,
                    error = %e,
                    "classification failed, exporting without sentiment"
                );
                None
            }
        }
    }
}

/// 분류 워커 풀
pub struct WorkerPool<C, E> {
    queue: Arc<HandoffQueue>,
    classifier: Option<Arc<C>>,
    normalizer: Arc<TextNormalizer>,
    exporter: Arc<E>,
    worker_count: usize,
    stats: Arc<WorkerStats>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl<C: SentimentClassifier, E: TelemetryExporter> WorkerPool<C, E> {
    /// 새 워커 풀을 생성합니다. `classifier`가 `None`이면 감성 필드 없이 전송합니다.
    ///
    /// # Errors
    /// - `worker_count`가 0인 경우
    /// - 정규화 패턴을 컴파일할 수 없는 경우
    pub fn new(
        queue: Arc<HandoffQueue>,
        classifier: Option<Arc<C>>,
        exporter: Arc<E>,
        worker_count: usize,
    ) -> Result<Self, StreamPipelineError> {
        if worker_count == 0 {
            return Err(StreamPipelineError::Config {
                field: "pipeline.worker_count".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            queue,
            classifier,
            normalizer: Arc::new(TextNormalizer::new()?),
            exporter,
            worker_count,
            stats: Arc::new(WorkerStats::default()),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        })
    }

    /// 워커를 띄웁니다.
    pub fn start(&mut self) -> Result<(), StreamPipelineError> {
        if !self.handles.is_empty() {
            return Err(StreamPipelineError::AlreadyRunning("worker pool"));
        }

        self.cancel = CancellationToken::new();
        for id in 0..self.worker_count {
            let worker = Worker {
                id,
                queue: Arc::clone(&self.queue),
                classifier: self.classifier.clone(),
                normalizer: Arc::clone(&self.normalizer),
                exporter: Arc::clone(&self.exporter),
                stats: Arc::clone(&self.stats),
            };
            self.handles.push(tokio::spawn(worker.run(self.cancel.clone())));
        }

        info!(
            workers = self.worker_count,
            sentiment = self.classifier.is_some(),
            "worker pool started"
        );
        Ok(())
    }

    /// 모든 워커에 종료를 알리고 기다립니다. 멱등입니다.
    pub async fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "classification worker panicked");
            }
        }

        let stats = self.stats.snapshot();
        info!(
            processed = stats.processed,
            records = stats.records,
            classification_failures = stats.classification_failures,
            "worker pool stopped"
        );
    }

    /// 실행 중인지 확인합니다.
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// 워커 수
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// 통계
    pub fn stats(&self) -> WorkerSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentiment::{LexiconClassifier, SentimentLabel};
    use crate::testing::{MockClassifier, RecordingExporter};

    fn tagged(id: &str, text: &str, tags: &[&str]) -> RawItem {
        let mut item = RawItem::with_text(id, text);
        item.matching_rule_tags = tags.iter().map(|t| (*t).to_owned()).collect();
        item
    }

    #[test]
    fn backoff_grows_to_ceiling() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.current(), Duration::ZERO);
        assert_eq!(backoff.on_empty(), Duration::from_millis(100));
        assert_eq!(backoff.on_empty(), Duration::from_millis(200));

        for _ in 0..100 {
            backoff.on_empty();
        }
        assert_eq!(backoff.current(), BACKOFF_CEILING);

        backoff.reset();
        assert_eq!(backoff.current(), Duration::ZERO);
    }

    #[test]
    fn backoff_reaches_ceiling_after_fifty_empty_polls() {
        let mut backoff = Backoff::new();
        for _ in 0..49 {
            backoff.on_empty();
        }
        assert!(backoff.current() < BACKOFF_CEILING);
        assert_eq!(backoff.on_empty(), BACKOFF_CEILING);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_wakes_on_cancel() {
        let cancel = CancellationToken::new();
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { wait_or_cancel(&cancel, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_elapses_without_cancel() {
        let cancel = CancellationToken::new();
        assert!(!wait_or_cancel(&cancel, Duration::from_millis(100)).await);
        assert!(!wait_or_cancel(&cancel, Duration::ZERO).await);
    }

    #[test]
    fn zero_workers_rejected() {
        let result = WorkerPool::<MockClassifier, RecordingExporter>::new(
            Arc::new(HandoffQueue::unbounded()),
            None,
            Arc::new(RecordingExporter::new()),
            0,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fan_out_shares_one_classification() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let classifier = Arc::new(MockClassifier::fixed(SentimentLabel::Positive, 0.8));
        let exporter = Arc::new(RecordingExporter::new());
        queue.push(tagged("1", "great launch", &["a", "b", "c"]));

        let mut pool =
            WorkerPool::new(Arc::clone(&queue), Some(Arc::clone(&classifier)), Arc::clone(&exporter), 1)
                .unwrap();
        pool.start().unwrap();
        exporter.wait_for(3).await;
        pool.stop().await;

        assert_eq!(classifier.calls(), 1);
        let records = exporter.records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.sentiment_score == Some(0.9)));
        assert_eq!(pool.stats().processed, 1);
        assert_eq!(pool.stats().records, 3);
    }

    #[tokio::test]
    async fn empty_after_normalization_skips_classifier() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let classifier = Arc::new(MockClassifier::fixed(SentimentLabel::Positive, 1.0));
        let exporter = Arc::new(RecordingExporter::new());
        queue.push(tagged("1", "@alice https://t.co/x", &["a"]));

        let mut pool =
            WorkerPool::new(Arc::clone(&queue), Some(Arc::clone(&classifier)), Arc::clone(&exporter), 1)
                .unwrap();
        pool.start().unwrap();
        exporter.wait_for(1).await;
        pool.stop().await;

        assert_eq!(classifier.calls(), 0);
        let record = &exporter.records()[0];
        assert_eq!(record.sentiment_glyph, Some("🟡"));
        assert_eq!(record.sentiment_score, Some(0.5));
    }

    #[tokio::test]
    async fn classifier_failure_still_exports() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let classifier = Arc::new(MockClassifier::failing("model unavailable"));
        let exporter = Arc::new(RecordingExporter::new());
        queue.push(tagged("1", "hello there", &["a", "b"]));
        queue.push(tagged("2", "second post", &["a"]));

        let mut pool =
            WorkerPool::new(Arc::clone(&queue), Some(classifier), Arc::clone(&exporter), 1).unwrap();
        pool.start().unwrap();
        exporter.wait_for(3).await;
        pool.stop().await;

        let records = exporter.records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.sentiment_glyph.is_none()));
        assert_eq!(pool.stats().classification_failures, 2);
    }

    #[tokio::test]
    async fn sentiment_disabled_leaves_fields_unset() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let exporter = Arc::new(RecordingExporter::new());
        queue.push(tagged("1", "loved this!", &["a"]));

        let mut pool =
            WorkerPool::<LexiconClassifier, _>::new(Arc::clone(&queue), None, Arc::clone(&exporter), 1)
                .unwrap();
        pool.start().unwrap();
        exporter.wait_for(1).await;
        pool.stop().await;

        assert!(exporter.records()[0].sentiment_score.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_picks_up_within_ceiling() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let exporter = Arc::new(RecordingExporter::new());
        let mut pool =
            WorkerPool::<LexiconClassifier, _>::new(Arc::clone(&queue), None, Arc::clone(&exporter), 1)
                .unwrap();
        pool.start().unwrap();

        // 백오프가 상한에 도달할 만큼 오래 비워 둔다
        tokio::time::sleep(Duration::from_secs(300)).await;
        queue.push(tagged("1", "late item", &["a"]));

        let within = BACKOFF_CEILING + Duration::from_millis(1);
        assert!(tokio::time::timeout(within, exporter.wait_for(1)).await.is_ok());

        // 처리 직후에는 백오프가 초기화되어 다음 항목을 바로 가져간다
        queue.push(tagged("2", "next item", &["a"]));
        let within = BACKOFF_STEP + Duration::from_millis(1);
        assert!(tokio::time::timeout(within, exporter.wait_for(2)).await.is_ok());

        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_observed_within_one_backoff_cycle() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let exporter = Arc::new(RecordingExporter::new());
        let mut pool =
            WorkerPool::<LexiconClassifier, _>::new(queue, None, exporter, 2).unwrap();
        pool.start().unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let started = tokio::time::Instant::now();
        pool.stop().await;
        assert!(started.elapsed() < BACKOFF_CEILING);
        assert!(!pool.is_running());

        // 두 번째 stop은 no-op
        pool.stop().await;
    }

    #[tokio::test]
    async fn single_worker_preserves_fifo() {
        let queue = Arc::new(HandoffQueue::unbounded());
        let exporter = Arc::new(RecordingExporter::new());
        for i in 0..20 {
            queue.push(tagged(&i.to_string(), &format!("post {i}"), &["a"]));
        }

        let mut pool =
            WorkerPool::<LexiconClassifier, _>::new(Arc::clone(&queue), None, Arc::clone(&exporter), 1)
                .unwrap();
        pool.start().unwrap();
        exporter.wait_for(20).await;
        pool.stop().await;

        let messages: Vec<String> = exporter.records().into_iter().map(|r| r.message).collect();
        let expected: Vec<String> = (0..20).map(|i| format!("post {i}")).collect();
        assert_eq!(messages, expected);
    }
}
