//! 레코드 싱크 구현
//!
//! - [`NewRelicLogSink`]: New Relic Log API로 배치를 POST
//! - [`JsonLinesSink`]: 레코드를 한 줄에 하나씩 JSON으로 기록 (stdout, 테스트용 writer)

use std::fmt;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StreamPipelineError;
use crate::record::{EnrichedRecord, PROVIDER};

use super::RecordSink;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// New Relic Log API 싱크
pub struct NewRelicLogSink {
    client: reqwest::Client,
    endpoint: String,
    insert_key: String,
}

impl fmt::Debug for NewRelicLogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewRelicLogSink")
            .field("endpoint", &self.endpoint)
            .field("insert_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
struct LogBatch<'a> {
    common: Common,
    logs: Vec<LogEntry<'a>>,
}

#[derive(Serialize)]
struct Common {
    attributes: Map<String, Value>,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: i64,
    message: &'a str,
    attributes: Map<String, Value>,
}

impl NewRelicLogSink {
    /// 새 싱크를 생성합니다.
    ///
    /// # Errors
    /// HTTP 클라이언트를 구성할 수 없는 경우
    pub fn new(
        endpoint: impl Into<String>,
        insert_key: impl Into<String>,
    ) -> Result<Self, StreamPipelineError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("streammon/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            insert_key: insert_key.into(),
        })
    }

    /// 요청 본문을 만듭니다. 배열 하나에 배치 하나가 들어갑니다.
    pub fn payload(batch: &[EnrichedRecord]) -> Value {
        let mut common = Map::new();
        common.insert("provider".to_owned(), Value::from(PROVIDER));

        let body = [LogBatch {
            common: Common { attributes: common },
            logs: batch
                .iter()
                .map(|r| LogEntry {
                    timestamp: r.timestamp,
                    message: &r.message,
                    attributes: r.attributes(),
                })
                .collect(),
        }];
        serde_json::to_value(body).unwrap_or(Value::Null)
    }
}

impl RecordSink for NewRelicLogSink {
    fn name(&self) -> &str {
        "newrelic"
    }

    async fn send(&self, batch: &[EnrichedRecord]) -> Result<(), StreamPipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Api-Key", &self.insert_key)
            .json(&Self::payload(batch))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamPipelineError::Exporter(format!(
                "log endpoint returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

/// JSON lines 싱크
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

impl JsonLinesSink {
    /// 표준 출력 싱크
    pub fn stdout() -> Self {
        Self::to_writer(std::io::stdout())
    }

    /// 임의의 writer로 기록하는 싱크
    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }
}

impl RecordSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn send(&self, batch: &[EnrichedRecord]) -> Result<(), StreamPipelineError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for record in batch {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// 설정으로 선택되는 싱크
#[derive(Debug)]
pub enum ConfiguredSink {
    /// New Relic Log API
    NewRelic(NewRelicLogSink),
    /// 표준 출력 JSON lines
    JsonLines(JsonLinesSink),
}

impl ConfiguredSink {
    /// `telemetry.sink` 값으로 싱크를 만듭니다.
    ///
    /// # Errors
    /// 알 수 없는 싱크 이름이거나 HTTP 클라이언트 생성에 실패한 경우
    pub fn from_config(
        telemetry: &streammon_core::config::TelemetryConfig,
    ) -> Result<Self, StreamPipelineError> {
        match telemetry.sink.as_str() {
            "newrelic" => Ok(Self::NewRelic(NewRelicLogSink::new(
                telemetry.endpoint.clone(),
                telemetry.insert_key.clone(),
            )?)),
            "stdout" => Ok(Self::JsonLines(JsonLinesSink::stdout())),
            other => Err(StreamPipelineError::Config {
                field: "telemetry.sink".to_owned(),
                reason: format!("unknown sink '{other}'"),
            }),
        }
    }
}

impl RecordSink for ConfiguredSink {
    fn name(&self) -> &str {
        match self {
            Self::NewRelic(s) => s.name(),
            Self::JsonLines(s) => s.name(),
        }
    }

    async fn send(&self, batch: &[EnrichedRecord]) -> Result<(), StreamPipelineError> {
        match self {
            Self::NewRelic(s) => s.send(batch).await,
            Self::JsonLines(s) => s.send(batch).await,
        }
    }
}
