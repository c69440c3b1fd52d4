//! 스트림 매칭 규칙 -- 규칙 모델, YAML 로딩, 교체 계획
//!
//! # 규칙 형식
//! ```yaml
//! - brand: acme
//! - competitor: "globex OR initech"
//! ```
//!
//! # 아키텍처
//! - [`types`]: 규칙/규칙 집합/설치 상태 데이터 구조
//! - [`loader`]: YAML 파일 로딩 및 유효성 검증
//! - [`SwapPlan`]: 설치된 규칙과 새 규칙 집합으로부터 삭제/추가 목록 계산

pub mod loader;
pub mod types;

pub use loader::RuleLoader;
pub use types::{InstalledRule, Rule, RuleSet, RuleUpdateSummary, SwapStrategy};

/// 규칙 교체 계획
///
/// 소스에 설치된 규칙 목록과 원하는 [`RuleSet`]을 비교해
/// 어떤 규칙을 삭제하고 어떤 규칙을 추가할지 결정합니다.
/// 실제 호출 순서는 `strategy`가 결정합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPlan {
    /// 교체 전략
    pub strategy: SwapStrategy,
    /// 삭제할 규칙 ID
    pub delete_ids: Vec<String>,
    /// 추가할 규칙
    pub add: Vec<Rule>,
}

impl SwapPlan {
    /// 교체 계획을 계산합니다.
    ///
    /// - `DeleteThenAdd`: 설치된 규칙 전부 삭제, 새 규칙 전부 추가
    /// - `AddThenDelete`: 동일한 `(tag, value)` 규칙은 유지하고 차이만 추가/삭제
    pub fn compute(strategy: SwapStrategy, installed: &[InstalledRule], desired: &RuleSet) -> Self {
        match strategy {
            SwapStrategy::DeleteThenAdd => Self {
                strategy,
                delete_ids: installed.iter().map(|r| r.id.clone()).collect(),
                add: desired.rules().to_vec(),
            },
            SwapStrategy::AddThenDelete => {
                let mut kept = vec![false; installed.len()];
                let mut add = Vec::new();

                for rule in desired.iter() {
                    let existing = installed
                        .iter()
                        .enumerate()
                        .find(|(i, r)| !kept[*i] && r.same_as(rule));
                    match existing {
                        Some((i, _)) => kept[i] = true,
                        None => add.push(rule.clone()),
                    }
                }

                let delete_ids = installed
                    .iter()
                    .zip(kept)
                    .filter(|(_, keep)| !keep)
                    .map(|(r, _)| r.id.clone())
                    .collect();

                Self {
                    strategy,
                    delete_ids,
                    add,
                }
            }
        }
    }

    /// 변경할 것이 없는지 확인합니다.
    pub fn is_noop(&self) -> bool {
        self.delete_ids.is_empty() && self.add.is_empty()
    }
}
