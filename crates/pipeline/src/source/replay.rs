//! JSON-lines 재생 소스
//!
//! 녹화된 스트림 페이로드(한 줄에 JSON 하나)를 순서대로 재생한 뒤 정상 종료합니다.
//! 규칙은 메모리에만 보관합니다.
//!
//! 페이로드에 `matching_rules`가 없으면 활성 규칙으로 직접 매칭합니다.
//! 규칙 값은 ` OR `로 구분된 키워드 목록으로 해석하며, 대소문자를 무시한 부분 문자열 검색을
//! 수행합니다. 어떤 규칙에도 매칭되지 않는 게시물은 전달하지 않습니다.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::StreamPipelineError;
use crate::rule::{InstalledRule, Rule, RuleUpdateSummary};

use super::payload::{Delivery, RawItem};
use super::{StreamEvent, StreamSource};

/// JSON-lines 파일 재생 소스
#[derive(Debug)]
pub struct ReplayStreamSource {
    path: PathBuf,
    rules: Mutex<Vec<InstalledRule>>,
}

impl ReplayStreamSource {
    /// 재생 파일 경로로 소스를 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rules: Mutex::new(Vec::new()),
        }
    }

    /// 현재 활성 규칙의 스냅샷을 반환합니다.
    pub fn installed(&self) -> Vec<InstalledRule> {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 페이로드에 매칭 정보가 없으면 활성 규칙으로 매칭합니다.
    ///
    /// 어떤 규칙에도 매칭되지 않으면 `None`을 반환합니다.
    fn route(&self, mut item: RawItem) -> Option<RawItem> {
        if !item.matching_rule_tags.is_empty() {
            return Some(item);
        }

        let text = item.text.to_lowercase();
        let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        item.matching_rule_tags = rules
            .iter()
            .filter(|r| {
                r.value
                    .split(" OR ")
                    .map(|k| k.trim().trim_matches('"').to_lowercase())
                    .any(|k| !k.is_empty() && text.contains(&k))
            })
            .filter_map(|r| r.tag.clone())
            .collect();

        if item.matching_rule_tags.is_empty() {
            None
        } else {
            Some(item)
        }
    }
}

impl StreamSource for ReplayStreamSource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn fetch_rules(&self) -> Result<Vec<InstalledRule>, StreamPipelineError> {
        Ok(self.installed())
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<RuleUpdateSummary, StreamPipelineError> {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let before = rules.len();
        rules.retain(|r| !ids.contains(&r.id));
        Ok(RuleUpdateSummary {
            deleted: before - rules.len(),
            ..RuleUpdateSummary::default()
        })
    }

    async fn add_rules(&self, add: &[Rule]) -> Result<RuleUpdateSummary, StreamPipelineError> {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let mut summary = RuleUpdateSummary::default();
        for rule in add {
            if rules.iter().any(|r| r.value == rule.value) {
                summary.not_created += 1;
                continue;
            }
            rules.push(InstalledRule {
                id: uuid::Uuid::new_v4().to_string(),
                tag: Some(rule.tag.clone()),
                value: rule.value.clone(),
            });
            summary.created += 1;
        }
        Ok(summary)
    }

    async fn subscribe(
        &self,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(), StreamPipelineError> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            StreamPipelineError::Source(format!(
                "failed to open replay file {}: {e}",
                self.path.display()
            ))
        })?;

        info!(path = %self.path.display(), "replaying recorded stream");
        if events.send(StreamEvent::Connected).await.is_err() {
            return Ok(());
        }

        let mut lines = BufReader::new(file).lines();
        let mut replayed: u64 = 0;

        loop {
            let line = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(replayed, "replay cancelled");
                    return Ok(());
                }
                line = lines.next_line() => line?,
            };

            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }

            let delivery = match Delivery::parse(&line) {
                Delivery::Post(item) => match self.route(item) {
                    Some(item) => Delivery::Post(item),
                    None => continue,
                },
                other => other,
            };

            if events.send(StreamEvent::Delivery(delivery)).await.is_err() {
                debug!("event receiver closed, ending replay");
                return Ok(());
            }
            replayed += 1;
        }

        info!(replayed, "replay finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(source: &ReplayStreamSource) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        source
            .subscribe(tx, CancellationToken::new())
            .await
            .unwrap();
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn add_and_delete_rules_in_memory() {
        let source = ReplayStreamSource::new("/nonexistent");
        let summary = source
            .add_rules(&[Rule::new("brand", "acme"), Rule::new("dup", "acme")])
            .await
            .unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.not_created, 1);

        let installed = source.fetch_rules().await.unwrap();
        assert_eq!(installed.len(), 1);

        let ids: Vec<String> = installed.iter().map(|r| r.id.clone()).collect();
        let summary = source.delete_rules(&ids).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(source.fetch_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replays_lines_and_routes_by_rule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        let content = [
            r#"{"data":{"id":"1","text":"I love ACME rockets"}}"#,
            "",
            r#"{"data":{"id":"2","text":"unrelated"}}"#,
            r#"{"data":{"id":"3","text":"tagged"},"matching_rules":[{"id":"x","tag":"preset"}]}"#,
            r#"{"errors":[{"title":"oops"}]}"#,
        ]
        .join("\n");
        tokio::fs::write(&path, content).await.unwrap();

        let source = ReplayStreamSource::new(&path);
        source
            .add_rules(&[Rule::new("brand", "acme OR acme-co")])
            .await
            .unwrap();

        let events = collect(&source).await;
        assert_eq!(events[0], StreamEvent::Connected);

        let posts: Vec<(String, Vec<String>)> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delivery(Delivery::Post(item)) => {
                    Some((item.id.clone(), item.matching_rule_tags.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            posts,
            vec![
                ("1".to_owned(), vec!["brand".to_owned()]),
                ("3".to_owned(), vec!["preset".to_owned()]),
            ]
        );
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Delivery(Delivery::Error(_)))
        ));
    }

    #[tokio::test]
    async fn missing_file_is_source_error() {
        let source = ReplayStreamSource::new("/definitely/not/here.jsonl");
        let (tx, _rx) = mpsc::channel(1);
        let err = source
            .subscribe(tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamPipelineError::Source(_)));
    }

    #[tokio::test]
    async fn cancelled_subscription_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        tokio::fs::write(&path, r#"{"data":{"id":"1","text":"x"}}"#)
            .await
            .unwrap();

        let source = ReplayStreamSource::new(&path);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(4);
        source.subscribe(tx, cancel).await.unwrap();
    }
}
