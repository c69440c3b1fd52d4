//! Twitter v2 filtered stream 소스
//!
//! - 규칙 관리: `GET/POST {api_base}/2/tweets/search/stream/rules`
//! - 구독: `GET {api_base}/2/tweets/search/stream` (newline-delimited JSON)
//!
//! 서버는 약 20초마다 빈 줄(keep-alive)을 보냅니다. [`STALL_TIMEOUT`] 동안 아무 데이터도
//! 받지 못하면 연결이 멈춘 것으로 보고 재연결합니다.
//!
//! # 재연결 정책
//! 연결 실패 시 `reconnect_backoff * attempt` 만큼 대기 후 재시도합니다 (선형 증가).
//! 연속 재시도가 `max_reconnect_attempts`를 넘으면 `SubscriptionExhausted`를 반환합니다.
//! 한 번이라도 연결에 성공하면 시도 횟수는 초기화됩니다.

use std::fmt;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StreamPipelineError;
use crate::rule::{InstalledRule, Rule, RuleUpdateSummary};

use super::payload::Delivery;
use super::{StreamEvent, StreamSource};

/// keep-alive 없이 이 시간이 지나면 연결을 끊고 재연결합니다.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP 요청 타임아웃 (규칙 API)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 한 줄 최대 크기 -- 이를 넘으면 버퍼를 비우고 다음 줄부터 다시 읽습니다.
const MAX_LINE_BYTES: usize = 1024 * 1024;

const RULES_PATH: &str = "/2/tweets/search/stream/rules";
const STREAM_PATH: &str = "/2/tweets/search/stream";

const STREAM_QUERY: [(&str, &str); 3] = [
    (
        "tweet.fields",
        "id,text,created_at,lang,possibly_sensitive,public_metrics,author_id",
    ),
    ("expansions", "author_id"),
    ("user.fields", "public_metrics"),
];

/// Twitter v2 filtered stream 소스
pub struct TwitterStreamSource {
    client: reqwest::Client,
    api_base: String,
    bearer_token: String,
    max_reconnect_attempts: u32,
    reconnect_backoff: Duration,
}

impl fmt::Debug for TwitterStreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterStreamSource")
            .field("api_base", &self.api_base)
            .field("bearer_token", &"[REDACTED]")
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_backoff", &self.reconnect_backoff)
            .finish()
    }
}

/// 한 번의 연결이 끝난 이유
enum StreamExit {
    /// 취소 토큰 또는 수신 측 종료
    Stopped,
    /// 서버가 연결을 닫았거나 연결이 멈춤
    Disconnected(String),
}

impl TwitterStreamSource {
    /// 새 소스를 생성합니다.
    ///
    /// # Errors
    /// HTTP 클라이언트를 구성할 수 없는 경우
    pub fn new(
        api_base: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> Result<Self, StreamPipelineError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("streammon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            bearer_token: bearer_token.into(),
            max_reconnect_attempts: 5,
            reconnect_backoff: Duration::from_secs(5),
        })
    }

    /// 재연결 정책을 설정합니다.
    pub fn with_reconnect(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    async fn post_rules(&self, body: &RulesRequest<'_>) -> Result<RulesResponse, StreamPipelineError> {
        let response = self
            .client
            .post(self.url(RULES_PATH))
            .bearer_auth(&self.bearer_token)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await?;
        Self::decode_rules_response(response).await
    }

    async fn decode_rules_response(
        response: reqwest::Response,
    ) -> Result<RulesResponse, StreamPipelineError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamPipelineError::Source(format!(
                "rules endpoint returned {status}: {body}"
            )));
        }
        let parsed: RulesResponse = response.json().await?;
        for error in &parsed.errors {
            warn!(
                title = error.title.as_deref().unwrap_or(""),
                value = error.value.as_deref().unwrap_or(""),
                "rule rejected by stream source"
            );
        }
        Ok(parsed)
    }

    /// 한 번 연결해 스트림을 읽습니다.
    ///
    /// 연결 자체에 실패하면 `Err`, 연결 후 끊기면 `Ok(Disconnected)`를 반환합니다.
    async fn stream_once(
        &self,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<StreamExit, StreamPipelineError> {
        let request = self
            .client
            .get(self.url(STREAM_PATH))
            .bearer_auth(&self.bearer_token)
            .query(&STREAM_QUERY)
            .send();

        let mut response = tokio::select! {
            () = cancel.cancelled() => return Ok(StreamExit::Stopped),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamPipelineError::Source(format!(
                "stream endpoint returned {status}: {body}"
            )));
        }

        info!(source = "twitter", "connected to filtered stream");
        if events.send(StreamEvent::Connected).await.is_err() {
            return Ok(StreamExit::Stopped);
        }

        let mut buffer = BytesMut::new();
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => return Ok(StreamExit::Stopped),
                chunk = tokio::time::timeout(STALL_TIMEOUT, response.chunk()) => chunk,
            };

            let chunk = match chunk {
                Err(_) => return Ok(StreamExit::Disconnected("stream stalled".to_owned())),
                Ok(Err(e)) => return Ok(StreamExit::Disconnected(e.to_string())),
                Ok(Ok(None)) => {
                    return Ok(StreamExit::Disconnected("server closed stream".to_owned()));
                }
                Ok(Ok(Some(chunk))) => chunk,
            };

            buffer.extend_from_slice(&chunk);
            for line in drain_lines(&mut buffer) {
                let delivery = Delivery::parse(&line);
                if events.send(StreamEvent::Delivery(delivery)).await.is_err() {
                    return Ok(StreamExit::Stopped);
                }
            }

            if buffer.len() > MAX_LINE_BYTES {
                warn!(bytes = buffer.len(), "discarding oversized stream line");
                buffer.clear();
            }
        }
    }
}

/// 버퍼에서 완성된 줄을 꺼냅니다. 빈 줄(keep-alive)은 건너뜁니다.
fn drain_lines(buffer: &mut BytesMut) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line = buffer.split_to(pos);
        buffer.advance(1);
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if !text.is_empty() {
            lines.push(text.to_owned());
        }
    }
    lines
}

impl StreamSource for TwitterStreamSource {
    fn name(&self) -> &str {
        "twitter"
    }

    async fn fetch_rules(&self) -> Result<Vec<InstalledRule>, StreamPipelineError> {
        let response = self
            .client
            .get(self.url(RULES_PATH))
            .bearer_auth(&self.bearer_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let parsed = Self::decode_rules_response(response).await?;
        Ok(parsed.data)
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<RuleUpdateSummary, StreamPipelineError> {
        if ids.is_empty() {
            return Ok(RuleUpdateSummary::default());
        }
        let body = RulesRequest {
            add: None,
            delete: Some(DeleteIds { ids }),
        };
        Ok(self.post_rules(&body).await?.summary())
    }

    async fn add_rules(&self, rules: &[Rule]) -> Result<RuleUpdateSummary, StreamPipelineError> {
        if rules.is_empty() {
            return Ok(RuleUpdateSummary::default());
        }
        let body = RulesRequest {
            add: Some(rules),
            delete: None,
        };
        Ok(self.post_rules(&body).await?.summary())
    }

    async fn subscribe(
        &self,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(), StreamPipelineError> {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let reason = match self.stream_once(&events, &cancel).await {
                Ok(StreamExit::Stopped) => return Ok(()),
                Ok(StreamExit::Disconnected(reason)) => {
                    attempt = 0;
                    reason
                }
                Err(e) => e.to_string(),
            };

            attempt += 1;
            if attempt > self.max_reconnect_attempts {
                return Err(StreamPipelineError::SubscriptionExhausted {
                    attempts: attempt,
                    reason,
                });
            }

            if events
                .send(StreamEvent::Error(reason.clone()))
                .await
                .is_err()
            {
                return Ok(());
            }

            let delay = self.reconnect_backoff * attempt;
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "stream disconnected, reconnecting"
            );

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
            debug!(attempt, "reconnecting to filtered stream");
        }
    }
}

// --- 와이어 포맷 ---

#[derive(Serialize)]
struct RulesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    add: Option<&'a [Rule]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delete: Option<DeleteIds<'a>>,
}

#[derive(Serialize)]
struct DeleteIds<'a> {
    ids: &'a [String],
}

#[derive(Deserialize, Default)]
struct RulesResponse {
    #[serde(default)]
    data: Vec<InstalledRule>,
    #[serde(default)]
    meta: RulesMeta,
    #[serde(default)]
    errors: Vec<RuleError>,
}

impl RulesResponse {
    fn summary(&self) -> RuleUpdateSummary {
        let s = &self.meta.summary;
        RuleUpdateSummary {
            deleted: s.deleted,
            created: s.created,
            not_created: s.not_created,
        }
    }
}

#[derive(Deserialize, Default)]
struct RulesMeta {
    #[serde(default)]
    summary: RulesSummary,
}

#[derive(Deserialize, Default)]
struct RulesSummary {
    #[serde(default)]
    created: usize,
    #[serde(default)]
    not_created: usize,
    #[serde(default)]
    deleted: usize,
}

#[derive(Deserialize)]
struct RuleError {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_lines_skips_keep_alive_and_keeps_partial() {
        let mut buf = BytesMut::from(&b"{\"a\":1}\r\n\r\n{\"b\":2}\n{\"c\""[..]);
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(&buf[..], b"{\"c\"");
    }

    #[test]
    fn add_request_serializes_value_and_tag() {
        let rules = [Rule::new("brand", "acme")];
        let body = RulesRequest {
            add: Some(&rules),
            delete: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"add": [{"tag": "brand", "value": "acme"}]})
        );
    }

    #[test]
    fn delete_request_serializes_ids() {
        let ids = ["1".to_owned(), "2".to_owned()];
        let body = RulesRequest {
            add: None,
            delete: Some(DeleteIds { ids: &ids }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"delete": {"ids": ["1", "2"]}}));
    }

    #[test]
    fn rules_response_summary() {
        let body = r#"{
            "data": [{"id": "1", "value": "acme", "tag": "brand"}],
            "meta": {"sent": "now", "summary": {"created": 1, "not_created": 1, "valid": 2, "invalid": 0}},
            "errors": [{"title": "DuplicateRule", "value": "acme"}]
        }"#;
        let parsed: RulesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data[0].tag.as_deref(), Some("brand"));
        assert_eq!(
            parsed.summary(),
            RuleUpdateSummary {
                deleted: 0,
                created: 1,
                not_created: 1
            }
        );
    }

    #[test]
    fn get_rules_without_data_is_empty() {
        let parsed: RulesResponse =
            serde_json::from_str(r#"{"meta":{"result_count":0}}"#).unwrap();
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn debug_redacts_token() {
        let source = TwitterStreamSource::new("https://api.example.com/", "secret").unwrap();
        let debug = format!("{source:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("api.example.com"));
        assert_eq!(source.url(STREAM_PATH), "https://api.example.com/2/tweets/search/stream");
    }

    #[tokio::test]
    async fn unreachable_endpoint_exhausts_retries() {
        // 포트 1은 연결이 즉시 거부됩니다.
        let source = TwitterStreamSource::new("http://127.0.0.1:1", "token")
            .unwrap()
            .with_reconnect(2, Duration::from_millis(1));
        let (tx, mut rx) = mpsc::channel(16);

        let err = source
            .subscribe(tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamPipelineError::SubscriptionExhausted { attempts: 3, .. }
        ));

        let mut errors = 0;
        while let Some(ev) = rx.recv().await {
            if matches!(ev, StreamEvent::Error(_)) {
                errors += 1;
            }
        }
        assert_eq!(errors, 2);
    }
}
