//! streammon 공통 크레이트
//!
//! 모든 streammon 크레이트가 공유하는 설정, 에러, 생명주기 trait,
//! 메트릭 이름을 제공합니다.
//!
//! - [`config`]: `streammon.toml` 파싱, 환경변수 오버라이드, 검증
//! - [`error`]: 최상위 에러 타입
//! - [`pipeline`]: 컴포넌트 생명주기 trait과 건강 상태
//! - [`metrics`]: Prometheus 메트릭 이름 상수

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, PipelineError, StreamMonError};

// 설정
pub use config::StreamMonConfig;

// 생명주기 trait
pub use pipeline::{HealthStatus, Pipeline};
