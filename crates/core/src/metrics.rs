//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `streammon_`
//! - 컴포넌트명: `ingest_`, `queue_`, `worker_`, `exporter_`, `rules_`
//! - 접미어: `_total` (counter), 없음 (gauge)

use metrics::{describe_counter, describe_gauge};

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 필터링 사유 레이블 키 (error, malformed, empty_text, sensitive)
pub const LABEL_REASON: &str = "reason";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Ingest 메트릭 ─────────────────────────────────────────────────

/// 스트림 소스에서 수신한 전체 delivery 수 (counter)
pub const INGEST_DELIVERIES_TOTAL: &str = "streammon_ingest_deliveries_total";

/// 큐에 적재된 게시물 수 (counter)
pub const INGEST_ACCEPTED_TOTAL: &str = "streammon_ingest_accepted_total";

/// 정책에 의해 걸러진 delivery 수 (counter, label: reason)
pub const INGEST_FILTERED_TOTAL: &str = "streammon_ingest_filtered_total";

// ─── Queue 메트릭 ──────────────────────────────────────────────────

/// hand-off 큐 적재량 (gauge)
pub const QUEUE_DEPTH: &str = "streammon_queue_depth";

/// bounded 큐에서 드롭된 게시물 수 (counter)
pub const QUEUE_DROPPED_TOTAL: &str = "streammon_queue_dropped_total";

// ─── Worker 메트릭 ─────────────────────────────────────────────────

/// 워커가 처리한 게시물 수 (counter)
pub const WORKER_ITEMS_PROCESSED_TOTAL: &str = "streammon_worker_items_processed_total";

/// 감성 분류 실패 수 (counter)
pub const WORKER_CLASSIFICATION_FAILURES_TOTAL: &str =
    "streammon_worker_classification_failures_total";

// ─── Exporter 메트릭 ───────────────────────────────────────────────

/// 익스포터에 제출된 레코드 수 (counter)
pub const EXPORTER_RECORDS_SUBMITTED_TOTAL: &str = "streammon_exporter_records_submitted_total";

/// 하베스트(배치 전송) 횟수 (counter, label: result)
pub const EXPORTER_HARVESTS_TOTAL: &str = "streammon_exporter_harvests_total";

// ─── Rule 메트릭 ───────────────────────────────────────────────────

/// 규칙 교체 시도 수 (counter, label: result)
pub const RULES_UPDATES_TOTAL: &str = "streammon_rules_updates_total";

/// 현재 활성 규칙 수 (gauge)
pub const RULES_ACTIVE: &str = "streammon_rules_active";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// 데몬 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "streammon_daemon_uptime_seconds";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    describe_counter!(
        INGEST_DELIVERIES_TOTAL,
        "Total deliveries received from the stream source"
    );
    describe_counter!(
        INGEST_ACCEPTED_TOTAL,
        "Posts accepted onto the hand-off queue"
    );
    describe_counter!(
        INGEST_FILTERED_TOTAL,
        "Deliveries dropped by ingestion policy, by reason"
    );
    describe_gauge!(QUEUE_DEPTH, "Posts waiting in the hand-off queue");
    describe_counter!(
        QUEUE_DROPPED_TOTAL,
        "Posts dropped by a bounded hand-off queue"
    );
    describe_counter!(
        WORKER_ITEMS_PROCESSED_TOTAL,
        "Posts enriched and exported by classification workers"
    );
    describe_counter!(
        WORKER_CLASSIFICATION_FAILURES_TOTAL,
        "Sentiment classification failures"
    );
    describe_counter!(
        EXPORTER_RECORDS_SUBMITTED_TOTAL,
        "Enriched records submitted to the telemetry exporter"
    );
    describe_counter!(
        EXPORTER_HARVESTS_TOTAL,
        "Telemetry harvest cycles, by result"
    );
    describe_counter!(RULES_UPDATES_TOTAL, "Rule swap attempts, by result");
    describe_gauge!(RULES_ACTIVE, "Rules in the currently active rule set");
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
}
