//! # streammon-pipeline
//!
//! 규칙 기반 실시간 스트림을 구독해 게시물을 수집하고, 감성을 분류한 뒤,
//! 텔레메트리 백엔드로 전송하는 파이프라인입니다.
//!
//! # 아키텍처
//! ```text
//! StreamSource ──(StreamEvent)──> StreamIngestor ──> HandoffQueue
//!                                       ^                  |
//!                  ReloadController ────┘ (규칙 교체)       v
//!                                                     WorkerPool
//!                                        normalize → classify → fan-out
//!                                                          |
//!                                                          v
//!                                               TelemetryExporter ──> RecordSink
//! ```
//!
//! [`StreamPipeline`]이 위 컴포넌트를 조립하고 시작/종료 순서를 관리합니다.
//! `streammon-core`의 `Pipeline` trait을 구현하므로 데몬은 생명주기만 알면 됩니다.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod exporter;
pub mod ingestor;
pub mod queue;
pub mod record;
pub mod reload;
pub mod rule;
pub mod sentiment;
pub mod source;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

// 설정 / 에러
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::StreamPipelineError;

// 코디네이터
pub use coordinator::{ShutdownReason, StreamPipeline, StreamPipelineBuilder};

// 규칙
pub use rule::{Rule, RuleLoader, RuleSet, RuleUpdateSummary, SwapStrategy};

// 소스 / 수집
pub use ingestor::{DeliveryOutcome, FilterReason, IngestSnapshot, RuleManager, StreamIngestor};
pub use source::{
    ConfiguredSource, Delivery, RawItem, ReplayStreamSource, StreamEvent, StreamSource,
    TwitterStreamSource,
};

// 큐 / 워커
pub use queue::{DropPolicy, HandoffQueue};
pub use worker::{Backoff, WorkerPool, WorkerSnapshot};

// 감성 / 레코드
pub use record::EnrichedRecord;
pub use sentiment::{
    LexiconClassifier, Presentation, SentimentClassifier, SentimentLabel, SentimentResult,
};

// 전송
pub use exporter::{BatchingExporter, ConfiguredSink, RecordSink, TelemetryExporter};

// 리로드
pub use reload::ReloadHandle;
