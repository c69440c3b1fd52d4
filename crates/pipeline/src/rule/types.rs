//! 매칭 규칙 데이터 타입
//!
//! 규칙 YAML 파일에서 역직렬화되는 [`Rule`]과, 활성 규칙 집합을 나타내는
//! 불변 값 타입 [`RuleSet`], 스트림 소스가 보고하는 설치 상태 타입을 정의합니다.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StreamPipelineError;

/// 태그 최대 길이
const MAX_TAG_LEN: usize = 256;
/// 규칙 값(쿼리) 최대 길이
const MAX_VALUE_LEN: usize = 1024;

/// 매칭 규칙 -- 스트림 소스의 쿼리 언어로 표현된 이름 붙은 조건
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    /// 규칙의 논리적 이름 (RuleSet 안에서 유일)
    pub tag: String,
    /// 스트림 소스 쿼리 (예: `acme OR acme-co`)
    pub value: String,
}

impl Rule {
    /// 새 규칙을 생성합니다.
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }

    /// 규칙의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), StreamPipelineError> {
        if self.tag.trim().is_empty() {
            return Err(StreamPipelineError::RuleValidation {
                tag: "(empty)".to_owned(),
                reason: "rule tag must not be empty".to_owned(),
            });
        }

        if self.tag.len() > MAX_TAG_LEN {
            return Err(StreamPipelineError::RuleValidation {
                tag: self.tag.clone(),
                reason: format!("rule tag must not exceed {MAX_TAG_LEN} characters"),
            });
        }

        if self.value.trim().is_empty() {
            return Err(StreamPipelineError::RuleValidation {
                tag: self.tag.clone(),
                reason: "rule value must not be empty".to_owned(),
            });
        }

        if self.value.len() > MAX_VALUE_LEN {
            return Err(StreamPipelineError::RuleValidation {
                tag: self.tag.clone(),
                reason: format!("rule value must not exceed {MAX_VALUE_LEN} characters"),
            });
        }

        Ok(())
    }
}

/// 활성 규칙 집합 -- 태그로 유일하게 식별되는 불변 규칙 모음
///
/// 생성 시점에 모든 규칙을 검증하며, 태그가 중복되면 생성에 실패합니다.
/// 설정 파일의 순서는 로그 출력용으로만 보존됩니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// 규칙 목록에서 RuleSet을 생성합니다.
    ///
    /// # Errors
    /// - 규칙 검증 실패
    /// - 태그 중복
    pub fn new(rules: Vec<Rule>) -> Result<Self, StreamPipelineError> {
        let mut seen = HashSet::with_capacity(rules.len());
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.tag.as_str()) {
                return Err(StreamPipelineError::RuleValidation {
                    tag: rule.tag.clone(),
                    reason: "duplicate tag in rule set".to_owned(),
                });
            }
        }
        Ok(Self { rules })
    }

    /// 빈 RuleSet을 생성합니다.
    pub fn empty() -> Self {
        Self::default()
    }

    /// 규칙 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 규칙이 하나도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 규칙을 순회합니다.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// 규칙 슬라이스를 반환합니다.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// 태그 목록을 반환합니다.
    pub fn tags(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.tag.as_str()).collect()
    }

    /// 주어진 태그가 포함되어 있는지 확인합니다.
    pub fn contains_tag(&self, tag: &str) -> bool {
        self.rules.iter().any(|r| r.tag == tag)
    }
}

/// 스트림 소스에 현재 설치되어 있는 규칙
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRule {
    /// 소스가 부여한 규칙 식별자
    pub id: String,
    /// 규칙 태그 (소스에 따라 없을 수 있음)
    #[serde(default)]
    pub tag: Option<String>,
    /// 규칙 쿼리
    pub value: String,
}

impl InstalledRule {
    /// 설치된 규칙이 주어진 논리 규칙과 동일한지 확인합니다.
    pub fn same_as(&self, rule: &Rule) -> bool {
        self.tag.as_deref() == Some(rule.tag.as_str()) && self.value == rule.value
    }
}

/// 규칙 변경 요청에 대한 소스의 처리 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleUpdateSummary {
    /// 삭제된 규칙 수
    pub deleted: usize,
    /// 새로 생성된 규칙 수
    pub created: usize,
    /// 거부되었거나 중복인 규칙 수
    pub not_created: usize,
}

impl RuleUpdateSummary {
    /// 두 결과를 합산합니다.
    pub fn merge(self, other: Self) -> Self {
        Self {
            deleted: self.deleted + other.deleted,
            created: self.created + other.created,
            not_created: self.not_created + other.not_created,
        }
    }
}

/// 규칙 교체 전략
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SwapStrategy {
    /// 전체 삭제 후 추가 (기본값). 삭제와 추가 사이에 활성 규칙이 0개인 구간이 존재합니다.
    #[default]
    DeleteThenAdd,
    /// 변경분 추가 후 나머지 삭제. 빈 구간이 없지만 잠시 신/구 규칙이 함께 활성화됩니다.
    AddThenDelete,
}

impl fmt::Display for SwapStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteThenAdd => write!(f, "delete_then_add"),
            Self::AddThenDelete => write!(f, "add_then_delete"),
        }
    }
}

impl FromStr for SwapStrategy {
    type Err = StreamPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delete_then_add" => Ok(Self::DeleteThenAdd),
            "add_then_delete" => Ok(Self::AddThenDelete),
            other => Err(StreamPipelineError::Config {
                field: "stream.swap_strategy".to_owned(),
                reason: format!("unknown swap strategy '{other}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_set_rejects_duplicate_tags() {
        let err = RuleSet::new(vec![Rule::new("brand", "acme"), Rule::new("brand", "other")])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rule_set_rejects_empty_value() {
        assert!(RuleSet::new(vec![Rule::new("brand", "  ")]).is_err());
    }

    #[test]
    fn rule_set_rejects_empty_tag() {
        assert!(RuleSet::new(vec![Rule::new("", "acme")]).is_err());
    }

    #[test]
    fn rule_set_rejects_overlong_value() {
        let value = "a".repeat(MAX_VALUE_LEN + 1);
        assert!(RuleSet::new(vec![Rule::new("long", value)]).is_err());
    }

    #[test]
    fn rule_set_exposes_tags_in_order() {
        let set = RuleSet::new(vec![Rule::new("b", "beta"), Rule::new("a", "alpha")]).unwrap();
        assert_eq!(set.tags(), vec!["b", "a"]);
        assert!(set.contains_tag("a"));
        assert!(!set.contains_tag("c"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn installed_rule_same_as_compares_tag_and_value() {
        let installed = InstalledRule {
            id: "1".to_owned(),
            tag: Some("brand".to_owned()),
            value: "acme".to_owned(),
        };
        assert!(installed.same_as(&Rule::new("brand", "acme")));
        assert!(!installed.same_as(&Rule::new("brand", "acme OR acme-co")));
        assert!(!installed.same_as(&Rule::new("brand2", "acme")));
    }

    #[test]
    fn swap_strategy_parse_and_display() {
        assert_eq!(
            "add_then_delete".parse::<SwapStrategy>().unwrap(),
            SwapStrategy::AddThenDelete
        );
        assert_eq!(SwapStrategy::default().to_string(), "delete_then_add");
        assert!("atomic".parse::<SwapStrategy>().is_err());
    }

    #[test]
    fn summary_merge_adds_fields() {
        let a = RuleUpdateSummary {
            deleted: 2,
            created: 0,
            not_created: 0,
        };
        let b = RuleUpdateSummary {
            deleted: 0,
            created: 3,
            not_created: 1,
        };
        assert_eq!(
            a.merge(b),
            RuleUpdateSummary {
                deleted: 2,
                created: 3,
                not_created: 1
            }
        );
    }
}
