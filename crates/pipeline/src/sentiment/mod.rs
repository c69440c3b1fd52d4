//! 감성 분석 -- 분류기 trait, 텍스트 정규화, 표시 매핑
//!
//! - [`SentimentClassifier`]: 텍스트 → 레이블 + 신뢰도 (동기, 워커의 blocking 풀에서 호출)
//! - [`TextNormalizer`]: 멘션/RT 마커/URL 제거 후 공백 정리
//! - [`Presentation`]: 레이블/신뢰도 → 글리프 + 0~1 점수
//! - [`LexiconClassifier`]: 내장 단어 목록 기반 분류기

pub mod lexicon;
pub mod normalize;
pub mod presentation;

pub use lexicon::LexiconClassifier;
pub use normalize::TextNormalizer;
pub use presentation::Presentation;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StreamPipelineError;

/// 감성 레이블
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentimentLabel {
    /// 긍정
    Positive,
    /// 부정
    Negative,
    /// 중립
    Neutral,
    /// 판단 불가 (빈 텍스트 등)
    Unknown,
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => write!(f, "POSITIVE"),
            Self::Negative => write!(f, "NEGATIVE"),
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// 분류 결과
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    /// 레이블
    pub label: SentimentLabel,
    /// 신뢰도 (0.0 ~ 1.0)
    pub confidence: f64,
}

impl SentimentResult {
    /// 결과를 생성합니다. 신뢰도는 0~1로 제한되며 NaN은 0으로 취급합니다.
    pub fn new(label: SentimentLabel, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self { label, confidence }
    }

    /// 판단 불가 결과
    pub fn unknown() -> Self {
        Self {
            label: SentimentLabel::Unknown,
            confidence: 0.0,
        }
    }
}

/// 감성 분류기 trait
///
/// 분류는 CPU 작업이므로 동기 함수입니다. 워커는 `spawn_blocking`으로 호출합니다.
pub trait SentimentClassifier: Send + Sync + 'static {
    /// 분류기 이름 (로그용)
    fn name(&self) -> &str;

    /// 정규화된 텍스트를 분류합니다.
    fn classify(&self, text: &str) -> Result<SentimentResult, StreamPipelineError>;
}
