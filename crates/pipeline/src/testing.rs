//! 테스트용 협력 객체
//!
//! 파이프라인 컴포넌트를 외부 서비스 없이 검증하기 위한 mock 구현입니다.
//!
//! - [`MockStreamSource`]: 메모리 규칙 저장소 + 스크립트 이벤트 재생
//! - [`MockClassifier`]: 고정 결과 또는 실패를 돌려주는 분류기
//! - [`RecordingExporter`]: 제출된 레코드를 메모리에 보관하는 익스포터

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::StreamPipelineError;
use crate::exporter::TelemetryExporter;
use crate::record::EnrichedRecord;
use crate::rule::{InstalledRule, Rule, RuleUpdateSummary};
use crate::sentiment::{SentimentClassifier, SentimentLabel, SentimentResult};
use crate::source::{StreamEvent, StreamSource};

/// 스크립트 기반 mock 스트림 소스
///
/// 규칙 변경마다 설치된 태그 목록을 기록하므로 교체 중 빈 구간을 관찰할 수 있습니다.
#[derive(Debug, Default)]
pub struct MockStreamSource {
    installed: Mutex<Vec<InstalledRule>>,
    history: Mutex<Vec<Vec<String>>>,
    script: Mutex<VecDeque<StreamEvent>>,
    next_id: AtomicU64,
    fail_rules: AtomicBool,
    fail_subscription: Mutex<Option<String>>,
    keep_open: AtomicBool,
    subscriptions: AtomicU32,
}

impl MockStreamSource {
    /// 규칙과 스크립트가 비어 있는 소스를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 구독 시 전달할 이벤트를 추가합니다.
    pub fn push_event(&self, event: StreamEvent) {
        lock(&self.script).push_back(event);
    }

    /// 규칙 API 호출이 실패하도록 설정합니다.
    pub fn fail_rule_calls(&self, fail: bool) {
        self.fail_rules.store(fail, Ordering::SeqCst);
    }

    /// 스크립트를 모두 보낸 뒤 재시도 한도 소진으로 실패하도록 설정합니다.
    pub fn fail_subscription(&self, reason: &str) {
        *lock(&self.fail_subscription) = Some(reason.to_owned());
    }

    /// 스크립트를 모두 보낸 뒤 취소될 때까지 연결을 유지하도록 설정합니다.
    pub fn keep_open(&self, keep: bool) {
        self.keep_open.store(keep, Ordering::SeqCst);
    }

    /// 현재 설치된 규칙 태그
    pub fn active_tags(&self) -> Vec<String> {
        tags_of(&lock(&self.installed))
    }

    /// 규칙 변경마다 기록된 설치 태그 목록
    pub fn rule_history(&self) -> Vec<Vec<String>> {
        lock(&self.history).clone()
    }

    /// `subscribe` 호출 횟수
    pub fn subscription_count(&self) -> u32 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    fn check_rule_call(&self) -> Result<(), StreamPipelineError> {
        if self.fail_rules.load(Ordering::SeqCst) {
            return Err(StreamPipelineError::Source("mock rule call failure".to_owned()));
        }
        Ok(())
    }

    fn record_history(&self, installed: &[InstalledRule]) {
        lock(&self.history).push(tags_of(installed));
    }
}

impl StreamSource for MockStreamSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_rules(&self) -> Result<Vec<InstalledRule>, StreamPipelineError> {
        self.check_rule_call()?;
        Ok(lock(&self.installed).clone())
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<RuleUpdateSummary, StreamPipelineError> {
        self.check_rule_call()?;
        let mut installed = lock(&self.installed);
        let before = installed.len();
        installed.retain(|r| !ids.contains(&r.id));
        let deleted = before - installed.len();
        self.record_history(&installed);
        Ok(RuleUpdateSummary {
            deleted,
            ..RuleUpdateSummary::default()
        })
    }

    async fn add_rules(&self, rules: &[Rule]) -> Result<RuleUpdateSummary, StreamPipelineError> {
        self.check_rule_call()?;
        let mut installed = lock(&self.installed);
        let mut summary = RuleUpdateSummary::default();
        for rule in rules {
            if installed.iter().any(|r| r.value == rule.value) {
                summary.not_created += 1;
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            installed.push(InstalledRule {
                id: id.to_string(),
                tag: Some(rule.tag.clone()),
                value: rule.value.clone(),
            });
            summary.created += 1;
        }
        self.record_history(&installed);
        Ok(summary)
    }

    async fn subscribe(
        &self,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(), StreamPipelineError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let next = lock(&self.script).pop_front();
            let Some(event) = next else { break };
            if events.send(event).await.is_err() {
                return Ok(());
            }
        }

        let failure = lock(&self.fail_subscription).clone();
        if let Some(reason) = failure {
            return Err(StreamPipelineError::SubscriptionExhausted {
                attempts: 1,
                reason,
            });
        }

        if self.keep_open.load(Ordering::SeqCst) {
            cancel.cancelled().await;
        }
        Ok(())
    }
}

/// 고정 결과를 돌려주는 mock 분류기
#[derive(Debug)]
pub struct MockClassifier {
    result: Result<SentimentResult, String>,
    delay: Duration,
    calls: AtomicU64,
    inputs: Mutex<Vec<String>>,
}

impl MockClassifier {
    /// 항상 같은 결과를 돌려주는 분류기
    pub fn fixed(label: SentimentLabel, confidence: f64) -> Self {
        Self {
            result: Ok(SentimentResult::new(label, confidence)),
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// 항상 실패하는 분류기
    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_owned()),
            ..Self::fixed(SentimentLabel::Unknown, 0.0)
        }
    }

    /// 분류마다 `delay`만큼 블로킹합니다.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `classify` 호출 횟수
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// 분류기에 전달된 텍스트 (정규화 후)
    pub fn inputs(&self) -> Vec<String> {
        lock(&self.inputs).clone()
    }
}

impl SentimentClassifier for MockClassifier {
    fn name(&self) -> &str {
        "mock"
    }

    fn classify(&self, text: &str) -> Result<SentimentResult, StreamPipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.inputs).push(text.to_owned());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.result
            .clone()
            .map_err(StreamPipelineError::Classifier)
    }
}

/// 제출된 레코드를 메모리에 보관하는 익스포터
#[derive(Debug, Default)]
pub struct RecordingExporter {
    records: Mutex<Vec<EnrichedRecord>>,
    notify: Notify,
    started: AtomicBool,
    fail_start: AtomicBool,
    flushes: AtomicU32,
}

impl RecordingExporter {
    /// 빈 익스포터를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// `start`가 실패하도록 설정된 익스포터
    pub fn with_failing_start() -> Self {
        let exporter = Self::default();
        exporter.fail_start.store(true, Ordering::SeqCst);
        exporter
    }

    /// 지금까지 제출된 레코드
    pub fn records(&self) -> Vec<EnrichedRecord> {
        lock(&self.records).clone()
    }

    /// 레코드가 `count`개 이상 쌓일 때까지 기다립니다.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if lock(&self.records).len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// `start`가 호출되었는지
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// `flush_and_stop` 호출 횟수
    pub fn flush_count(&self) -> u32 {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl TelemetryExporter for RecordingExporter {
    fn start(&self) -> Result<(), StreamPipelineError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(StreamPipelineError::Exporter("mock start failure".to_owned()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn submit(&self, record: EnrichedRecord) {
        lock(&self.records).push(record);
        self.notify.notify_waiters();
    }

    async fn flush_and_stop(&self) -> Result<(), StreamPipelineError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn tags_of(installed: &[InstalledRule]) -> Vec<String> {
    installed.iter().filter_map(|r| r.tag.clone()).collect()
}
