//! 배치 익스포터
//!
//! 제출된 레코드를 메모리에 모았다가 `interval`마다 싱크로 보냅니다.
//! `flush_and_stop`은 타이머를 멈춘 뒤 남은 레코드를 즉시 보냅니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use streammon_core::metrics as m;

use crate::error::StreamPipelineError;
use crate::record::EnrichedRecord;

use super::{RecordSink, TelemetryExporter};

/// 익스포터 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExporterSnapshot {
    /// 제출된 레코드 수
    pub submitted: u64,
    /// 전송에 성공한 레코드 수
    pub sent: u64,
    /// 전송 실패로 버려진 레코드 수
    pub failed: u64,
    /// 하베스트 횟수 (빈 버퍼 제외)
    pub harvests: u64,
}

#[derive(Debug, Default)]
struct ExporterStats {
    submitted: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    harvests: AtomicU64,
}

struct Shared<S> {
    sink: S,
    buffer: Mutex<Vec<EnrichedRecord>>,
    stats: ExporterStats,
}

impl<S: RecordSink> Shared<S> {
    fn take_buffer(&self) -> Vec<EnrichedRecord> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// 버퍼를 비워 싱크로 보냅니다.
    async fn harvest(&self) -> Result<usize, StreamPipelineError> {
        let batch = self.take_buffer();
        if batch.is_empty() {
            return Ok(0);
        }

        self.stats.harvests.fetch_add(1, Ordering::Relaxed);
        let count = batch.len();
        match self.sink.send(&batch).await {
            Ok(()) => {
                self.stats.sent.fetch_add(count as u64, Ordering::Relaxed);
                metrics::counter!(m::EXPORTER_HARVESTS_TOTAL, m::LABEL_RESULT => "success")
                    .increment(1);
                debug!(sink = self.sink.name(), records = count, "harvested records");
                Ok(count)
            }
            Err(e) => {
                self.stats.failed.fetch_add(count as u64, Ordering::Relaxed);
                metrics::counter!(m::EXPORTER_HARVESTS_TOTAL, m::LABEL_RESULT => "failure")
                    .increment(1);
                warn!(
                    sink = self.sink.name(),
                    records = count,
                    error = %e,
                    "harvest failed, dropping batch"
                );
                Err(e)
            }
        }
    }
}

/// 버퍼 + 하베스트 타이머 익스포터
pub struct BatchingExporter<S: RecordSink> {
    shared: Arc<Shared<S>>,
    interval: Duration,
    cancel: CancellationToken,
    harvester: Mutex<Option<JoinHandle<()>>>,
}

impl<S: RecordSink> BatchingExporter<S> {
    /// 새 익스포터를 생성합니다.
    pub fn new(sink: S, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                buffer: Mutex::new(Vec::new()),
                stats: ExporterStats::default(),
            }),
            interval,
            cancel: CancellationToken::new(),
            harvester: Mutex::new(None),
        }
    }

    /// 버퍼에 쌓인 레코드 수
    pub fn pending(&self) -> usize {
        self.shared
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 통계
    pub fn stats(&self) -> ExporterSnapshot {
        let s = &self.shared.stats;
        ExporterSnapshot {
            submitted: s.submitted.load(Ordering::Relaxed),
            sent: s.sent.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            harvests: s.harvests.load(Ordering::Relaxed),
        }
    }

    /// 싱크 참조
    pub fn sink(&self) -> &S {
        &self.shared.sink
    }
}

impl<S: RecordSink> TelemetryExporter for BatchingExporter<S> {
    fn start(&self) -> Result<(), StreamPipelineError> {
        let mut harvester = self
            .harvester
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if harvester.is_some() {
            return Err(StreamPipelineError::AlreadyRunning("telemetry exporter"));
        }
        if self.cancel.is_cancelled() {
            return Err(StreamPipelineError::Exporter(
                "exporter was already stopped".to_owned(),
            ));
        }

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let interval = self.interval;

        *harvester = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // 실패는 harvest 안에서 기록됩니다.
                        let _ = shared.harvest().await;
                    }
                }
            }
            debug!("harvest task stopped");
        }));

        info!(
            sink = self.shared.sink.name(),
            interval_secs = self.interval.as_secs_f64(),
            "telemetry exporter started"
        );
        Ok(())
    }

    fn submit(&self, record: EnrichedRecord) {
        self.shared
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::EXPORTER_RECORDS_SUBMITTED_TOTAL).increment(1);
    }

    async fn flush_and_stop(&self) -> Result<(), StreamPipelineError> {
        self.cancel.cancel();

        let handle = self
            .harvester
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "harvest task panicked");
        }

        let flushed = self.shared.harvest().await?;
        if flushed > 0 {
            let stats = self.stats();
            info!(
                flushed,
                sent = stats.sent,
                failed = stats.failed,
                "telemetry exporter flushed and stopped"
            );
        }
        Ok(())
    }
}
