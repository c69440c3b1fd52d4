//! 분류 결과 표시 매핑
//!
//! | label | glyph | score |
//! |---|---|---|
//! | POSITIVE | 🟢 | 0.5 + 0.5 × confidence |
//! | NEGATIVE | 🔴 | 0.5 − 0.5 × confidence |
//! | NEUTRAL / UNKNOWN | 🟡 | 0.5 |
//!
//! 점수는 소수점 둘째 자리로 반올림합니다.

use super::{SentimentLabel, SentimentResult};

/// 긍정 글리프
pub const GLYPH_POSITIVE: &str = "🟢";
/// 부정 글리프
pub const GLYPH_NEGATIVE: &str = "🔴";
/// 중립/판단 불가 글리프
pub const GLYPH_NEUTRAL: &str = "🟡";

/// 레코드에 실리는 감성 표시값
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Presentation {
    /// 글리프
    pub glyph: &'static str,
    /// 0.0(부정) ~ 1.0(긍정) 점수
    pub score: f64,
}

impl Presentation {
    /// 분류 결과를 표시값으로 변환합니다.
    pub fn from_result(result: &SentimentResult) -> Self {
        let (glyph, score) = match result.label {
            SentimentLabel::Positive => (GLYPH_POSITIVE, 0.5 + 0.5 * result.confidence),
            SentimentLabel::Negative => (GLYPH_NEGATIVE, 0.5 - 0.5 * result.confidence),
            SentimentLabel::Neutral | SentimentLabel::Unknown => (GLYPH_NEUTRAL, 0.5),
        };
        Self {
            glyph,
            score: round2(score),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
