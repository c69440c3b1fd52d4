//! 텔레메트리 익스포터 -- 레코드 버퍼링과 주기적 전송
//!
//! - [`TelemetryExporter`]: 워커가 레코드를 제출하는 인터페이스
//! - [`RecordSink`]: 배치 하나를 원격 수집기로 보내는 전송 계층
//! - [`BatchingExporter`]: 버퍼 + 하베스트 타이머로 `RecordSink`를 감싸는 익스포터
//!
//! # 전송 보장
//! best-effort입니다. 하베스트 중 싱크가 실패하면 해당 배치는 로그를 남기고 버립니다.

pub mod batching;
pub mod sink;

pub use batching::{BatchingExporter, ExporterSnapshot};
pub use sink::{ConfiguredSink, JsonLinesSink, NewRelicLogSink};

use std::future::Future;

use crate::error::StreamPipelineError;
use crate::record::EnrichedRecord;

/// 텔레메트리 익스포터 trait
pub trait TelemetryExporter: Send + Sync + 'static {
    /// 하베스트 타이머를 시작합니다. tokio 런타임 안에서 호출해야 합니다.
    fn start(&self) -> Result<(), StreamPipelineError>;

    /// 레코드를 제출합니다. 블로킹하지 않습니다.
    fn submit(&self, record: EnrichedRecord);

    /// 타이머를 멈추고 남은 레코드를 모두 전송합니다. 여러 번 호출해도 안전합니다.
    fn flush_and_stop(&self) -> impl Future<Output = Result<(), StreamPipelineError>> + Send;
}

/// 레코드 배치 전송 계층
pub trait RecordSink: Send + Sync + 'static {
    /// 싱크 이름 (로그용)
    fn name(&self) -> &str;

    /// 배치 하나를 전송합니다.
    fn send(
        &self,
        batch: &[EnrichedRecord],
    ) -> impl Future<Output = Result<(), StreamPipelineError>> + Send;
}
