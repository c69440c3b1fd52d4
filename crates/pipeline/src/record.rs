//! 전송 레코드 -- 게시물 + 매칭 규칙 + 감성 + 작성자 정보
//!
//! 게시물 하나가 규칙 k개에 매칭되면 `matching_rule`만 다른 레코드 k개를 만듭니다.
//! 감성 값은 한 번 계산해 모든 레코드가 공유합니다.

use chrono::Utc;
use serde::Serialize;

use crate::sentiment::Presentation;
use crate::source::RawItem;

/// 모든 레코드에 붙는 provider 속성
pub const PROVIDER: &str = "streammon";

/// 텔레메트리 백엔드로 전송되는 레코드
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    /// 게시 시각 (epoch millis)
    pub timestamp: i64,
    /// 원문
    pub message: String,
    /// 언어 코드
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// 민감 콘텐츠 플래그
    pub possibly_sensitive: bool,
    /// 리트윗 수
    pub retweet_count: u64,
    /// 답글 수
    pub reply_count: u64,
    /// 좋아요 수
    pub like_count: u64,
    /// 인용 수
    pub quote_count: u64,
    /// 매칭된 규칙 태그
    pub matching_rule: String,
    /// provider 속성
    pub provider: &'static str,
    /// 감성 글리프
    #[serde(rename = "sentiment", skip_serializing_if = "Option::is_none")]
    pub sentiment_glyph: Option<&'static str>,
    /// 감성 점수
    #[serde(rename = "score", skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    /// 작성자 표시 이름
    #[serde(rename = "name", skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    /// 작성자 핸들
    #[serde(rename = "username", skip_serializing_if = "Option::is_none")]
    pub author_handle: Option<String>,
    /// 게시물 링크
    #[serde(rename = "url", skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    /// 작성자 팔로워 수
    #[serde(rename = "follower_count", skip_serializing_if = "Option::is_none")]
    pub author_follower_count: Option<u64>,
}

impl EnrichedRecord {
    /// `timestamp`와 `message`를 제외한 속성 맵을 반환합니다.
    pub fn attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("timestamp");
                map.remove("message");
                map
            }
            _ => serde_json::Map::new(),
        }
    }
}

/// 게시물 링크를 만듭니다.
pub fn permalink(handle: &str, post_id: &str) -> String {
    format!("https://twitter.com/{handle}/status/{post_id}")
}

/// 게시물에서 매칭 태그별 레코드를 만듭니다.
///
/// `sentiment`가 `None`이면 감성 필드를 비워 둡니다.
/// 작성 시각은 수집 시 채워집니다. 수집을 거치지 않은 항목만 현재 시각을 사용합니다.
pub fn build_records(item: &RawItem, sentiment: Option<&Presentation>) -> Vec<EnrichedRecord> {
    let timestamp = item
        .created_at
        .unwrap_or_else(Utc::now)
        .timestamp_millis();
    let author = item.author();

    item.matching_rule_tags
        .iter()
        .map(|tag| EnrichedRecord {
            timestamp,
            message: item.text.clone(),
            lang: item.lang.clone(),
            possibly_sensitive: item.possibly_sensitive,
            retweet_count: item.metrics.retweet_count,
            reply_count: item.metrics.reply_count,
            like_count: item.metrics.like_count,
            quote_count: item.metrics.quote_count,
            matching_rule: tag.clone(),
            provider: PROVIDER,
            sentiment_glyph: sentiment.map(|p| p.glyph),
            sentiment_score: sentiment.map(|p| p.score),
            author_name: author.map(|u| u.display_name.clone()),
            author_handle: author.map(|u| u.handle.clone()),
            permalink: author.map(|u| permalink(&u.handle, &item.id)),
            author_follower_count: author.and_then(|u| u.follower_count),
        })
        .collect()
}
