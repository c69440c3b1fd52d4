//! 단어 목록 기반 감성 분류기
//!
//! 텍스트를 소문자 토큰으로 나눈 뒤 긍정/부정 단어 수를 셉니다.
//! 바로 앞 토큰이 부정어(`not`, `never`, ...)이면 극성을 뒤집습니다.
//!
//! - 레이블: 긍정 > 부정 → POSITIVE, 부정 > 긍정 → NEGATIVE, 그 외 NEUTRAL
//! - 신뢰도: `|pos - neg| / (pos + neg)`, 매칭 단어가 없으면 0

use std::collections::HashSet;

use crate::error::StreamPipelineError;

use super::{SentimentClassifier, SentimentLabel, SentimentResult};

const POSITIVE_WORDS: &[&str] = &[
    "amazing", "awesome", "beautiful", "best", "better", "brilliant", "cool", "delight",
    "delighted", "enjoy", "enjoyed", "excellent", "excited", "fantastic", "fast", "favorite",
    "fine", "fun", "glad", "good", "great", "happy", "impressed", "impressive", "incredible",
    "like", "liked", "love", "loved", "lovely", "loving", "nice", "perfect", "pleased",
    "recommend", "reliable", "smooth", "solid", "superb", "thank", "thanks", "win", "wonderful",
    "works", "wow",
];

const NEGATIVE_WORDS: &[&str] = &[
    "angry", "annoyed", "annoying", "awful", "bad", "broken", "bug", "buggy", "crash",
    "crashed", "disappointed", "disappointing", "down", "fail", "failed", "failure", "hate",
    "hated", "horrible", "issue", "lag", "laggy", "lost", "mess", "outage", "poor", "refund",
    "sad", "scam", "slow", "sucks", "terrible", "ugly", "unhappy", "unusable", "useless",
    "waste", "worse", "worst", "wrong",
];

const NEGATORS: &[&str] = &[
    "not", "no", "never", "dont", "don't", "isnt", "isn't", "wasnt", "wasn't", "cant",
    "can't", "won't", "wont", "hardly",
];

/// 단어 목록 기반 분류기
#[derive(Debug, Clone)]
pub struct LexiconClassifier {
    positive: HashSet<String>,
    negative: HashSet<String>,
    negators: HashSet<String>,
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self::with_words(POSITIVE_WORDS, NEGATIVE_WORDS)
    }
}

impl LexiconClassifier {
    /// 내장 단어 목록으로 분류기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 사용자 단어 목록으로 분류기를 생성합니다.
    pub fn with_words(positive: &[&str], negative: &[&str]) -> Self {
        let lower = |words: &[&str]| words.iter().map(|w| w.to_lowercase()).collect();
        Self {
            positive: lower(positive),
            negative: lower(negative),
            negators: lower(NEGATORS),
        }
    }

    fn score(&self, text: &str) -> (u32, u32) {
        let lowered = text.to_lowercase();
        let tokens = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|t| !t.is_empty());

        let (mut pos, mut neg) = (0u32, 0u32);
        let mut negated = false;
        for token in tokens {
            let polarity = if self.positive.contains(token) {
                Some(true)
            } else if self.negative.contains(token) {
                Some(false)
            } else {
                None
            };

            match polarity {
                Some(p) if p != negated => pos += 1,
                Some(_) => neg += 1,
                None => {}
            }
            negated = self.negators.contains(token);
        }
        (pos, neg)
    }
}

impl SentimentClassifier for LexiconClassifier {
    fn name(&self) -> &str {
        "lexicon"
    }

    fn classify(&self, text: &str) -> Result<SentimentResult, StreamPipelineError> {
        let (pos, neg) = self.score(text);
        let total = pos + neg;
        if total == 0 {
            return Ok(SentimentResult::new(SentimentLabel::Neutral, 0.0));
        }

        let label = match pos.cmp(&neg) {
            std::cmp::Ordering::Greater => SentimentLabel::Positive,
            std::cmp::Ordering::Less => SentimentLabel::Negative,
            std::cmp::Ordering::Equal => SentimentLabel::Neutral,
        };
        let confidence = f64::from(pos.abs_diff(neg)) / f64::from(total);
        Ok(SentimentResult::new(label, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> SentimentResult {
        LexiconClassifier::new().classify(text).unwrap()
    }

    #[test]
    fn positive_text() {
        let r = classify("loved this!");
        assert_eq!(r.label, SentimentLabel::Positive);
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn negative_text() {
        let r = classify("the app is slow and buggy, worst update");
        assert_eq!(r.label, SentimentLabel::Negative);
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn mixed_text_has_partial_confidence() {
        let r = classify("great camera, terrible battery, love the screen");
        assert_eq!(r.label, SentimentLabel::Positive);
        assert!((r.confidence - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn balanced_text_is_neutral() {
        let r = classify("good but bad");
        assert_eq!(r.label, SentimentLabel::Neutral);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn negation_flips_polarity() {
        assert_eq!(classify("not good").label, SentimentLabel::Negative);
        assert_eq!(classify("never slow").label, SentimentLabel::Positive);
    }

    #[test]
    fn no_known_words_is_neutral() {
        let r = classify("the quarterly report was published");
        assert_eq!(r.label, SentimentLabel::Neutral);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn custom_words() {
        let classifier = LexiconClassifier::with_words(&["Rocket"], &["Anvil"]);
        let r = classifier.classify("rocket rocket anvil").unwrap();
        assert_eq!(r.label, SentimentLabel::Positive);
        assert!((r.confidence - 1.0 / 3.0).abs() < 1e-9);
    }
}
