//! 규칙 파일 로더 -- YAML 규칙 파일을 디스크에서 로드합니다.
//!
//! 규칙 파일은 단일 항목 맵의 시퀀스입니다. 각 항목의 키가 태그, 값이 쿼리입니다.
//!
//! ```yaml
//! - brand: acme
//! - competitor: "globex OR initech"
//! ```
//!
//! 어떤 항목이라도 잘못되면 파일 전체를 거부합니다. 시작 시에는 치명적 에러,
//! 리로드 시에는 호출자가 로그를 남기고 기존 규칙을 유지합니다.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::StreamPipelineError;

use super::types::{Rule, RuleSet};

/// 규칙 파일 최대 크기
const MAX_RULE_FILE_SIZE: u64 = 1024 * 1024; // 1MB
/// 규칙 최대 개수
const MAX_RULES_COUNT: usize = 1_000;

/// 규칙 파일 로더
pub struct RuleLoader;

impl RuleLoader {
    /// YAML 파일에서 RuleSet을 로드합니다.
    ///
    /// # Errors
    /// - 파일을 읽을 수 없는 경우
    /// - 파일이 `MAX_RULE_FILE_SIZE`를 초과하는 경우
    /// - YAML 형식이 잘못되었거나 규칙 검증에 실패한 경우
    pub async fn load_file(path: impl AsRef<Path>) -> Result<RuleSet, StreamPipelineError> {
        let path = path.as_ref();

        let metadata =
            tokio::fs::metadata(path)
                .await
                .map_err(|e| StreamPipelineError::RuleLoad {
                    path: path.display().to_string(),
                    reason: format!("failed to read file metadata: {e}"),
                })?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(StreamPipelineError::RuleLoad {
                path: path.display().to_string(),
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| StreamPipelineError::RuleLoad {
                    path: path.display().to_string(),
                    reason: format!("failed to read file: {e}"),
                })?;

        let rule_set = Self::parse_yaml(&content, &path.display().to_string())?;

        tracing::info!(
            path = %path.display(),
            count = rule_set.len(),
            tags = ?rule_set.tags(),
            "loaded stream rules"
        );

        Ok(rule_set)
    }

    /// YAML 문자열을 파싱하여 RuleSet을 생성합니다.
    ///
    /// 빈 문서는 빈 RuleSet으로 취급합니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<RuleSet, StreamPipelineError> {
        if yaml_str.trim().is_empty() {
            return Ok(RuleSet::empty());
        }

        let entries: Vec<BTreeMap<String, String>> =
            serde_yaml::from_str(yaml_str).map_err(|e| StreamPipelineError::RuleLoad {
                path: source.to_owned(),
                reason: format!("YAML parse error: {e}"),
            })?;

        if entries.len() > MAX_RULES_COUNT {
            return Err(StreamPipelineError::RuleLoad {
                path: source.to_owned(),
                reason: format!("too many rules: max {MAX_RULES_COUNT}"),
            });
        }

        let mut rules = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            if entry.len() != 1 {
                return Err(StreamPipelineError::RuleLoad {
                    path: source.to_owned(),
                    reason: format!(
                        "entry {index} must map exactly one tag to one value, found {} keys",
                        entry.len()
                    ),
                });
            }
            rules.extend(entry.into_iter().map(|(tag, value)| Rule::new(tag, value)));
        }

        RuleSet::new(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_entry_maps() {
        let yaml = r#"
- brand: acme
- competitor: "globex OR initech"
"#;
        let set = RuleLoader::parse_yaml(yaml, "test").unwrap();
        assert_eq!(set.tags(), vec!["brand", "competitor"]);
        assert_eq!(set.rules()[1].value, "globex OR initech");
    }

    #[test]
    fn parse_empty_document_yields_empty_set() {
        let set = RuleLoader::parse_yaml("   \n", "test").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn parse_rejects_multi_key_entry() {
        let yaml = "- brand: acme\n  other: globex\n";
        let err = RuleLoader::parse_yaml(yaml, "test").unwrap_err();
        assert!(err.to_string().contains("exactly one tag"));
    }

    #[test]
    fn parse_rejects_non_sequence() {
        let err = RuleLoader::parse_yaml("brand: acme\n", "rules.yaml").unwrap_err();
        assert!(matches!(err, StreamPipelineError::RuleLoad { .. }));
        assert!(err.to_string().contains("rules.yaml"));
    }

    #[test]
    fn parse_rejects_duplicate_tags() {
        let yaml = "- brand: acme\n- brand: globex\n";
        let err = RuleLoader::parse_yaml(yaml, "test").unwrap_err();
        assert!(matches!(err, StreamPipelineError::RuleValidation { .. }));
    }

    #[tokio::test]
    async fn load_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        tokio::fs::write(&path, "- brand: acme\n").await.unwrap();

        let set = RuleLoader::load_file(&path).await.unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains_tag("brand"));
    }

    #[tokio::test]
    async fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuleLoader::load_file(dir.path().join("missing.yaml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing.yaml"));
    }
}
