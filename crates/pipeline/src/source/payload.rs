//! 스트림 페이로드 파싱
//!
//! 스트림 소스가 보내는 JSON 한 줄을 [`Delivery`]로 변환합니다.
//! 형태 검사는 모두 이 경계에서 끝나며, 이후 단계는 타입으로 구분된 값만 다룹니다.
//!
//! ```json
//! {"data": {"id": "1", "text": "...", "author_id": "42", "public_metrics": {...}},
//!  "includes": {"users": [{"id": "42", "name": "Alice", "username": "alice"}]},
//!  "matching_rules": [{"id": "9", "tag": "brand"}]}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 게시물 참여 지표
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    /// 리트윗 수
    #[serde(default)]
    pub retweet_count: u64,
    /// 답글 수
    #[serde(default)]
    pub reply_count: u64,
    /// 좋아요 수
    #[serde(default)]
    pub like_count: u64,
    /// 인용 수
    #[serde(default)]
    pub quote_count: u64,
}

/// 페이로드에 포함된 작성자 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedUser {
    /// 사용자 ID
    pub id: String,
    /// 표시 이름
    pub display_name: String,
    /// 핸들 (`@` 제외)
    pub handle: String,
    /// 팔로워 수
    pub follower_count: Option<u64>,
}

/// 수집된 원시 게시물 -- 수신 후 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    /// 게시물 ID
    pub id: String,
    /// 본문
    pub text: String,
    /// 작성 시각
    pub created_at: Option<DateTime<Utc>>,
    /// 언어 코드
    pub lang: Option<String>,
    /// 민감 콘텐츠 플래그
    pub possibly_sensitive: bool,
    /// 참여 지표
    pub metrics: PostMetrics,
    /// 작성자 ID
    pub author_id: Option<String>,
    /// 이 delivery에 대해 소스가 보고한 매칭 규칙 태그
    pub matching_rule_tags: Vec<String>,
    /// 페이로드에 포함된 사용자 목록
    pub included_users: Vec<IncludedUser>,
}

impl RawItem {
    /// 작성자 ID와 일치하는 포함 사용자를 찾습니다.
    pub fn author(&self) -> Option<&IncludedUser> {
        let author_id = self.author_id.as_deref()?;
        self.included_users.iter().find(|u| u.id == author_id)
    }

    /// 텍스트만 가진 게시물을 생성합니다. 테스트와 재생 도구에서 사용합니다.
    pub fn with_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            created_at: None,
            lang: None,
            possibly_sensitive: false,
            metrics: PostMetrics::default(),
            author_id: None,
            matching_rule_tags: Vec::new(),
            included_users: Vec::new(),
        }
    }
}

/// 스트림 소스가 전달한 단일 delivery
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// 전송 계층 에러 (소스가 보고한 에러 메시지 목록)
    Error(Vec<String>),
    /// 게시물
    Post(RawItem),
    /// 게시물로 인식할 수 없는 페이로드
    Other(String),
}

impl Delivery {
    /// JSON 한 줄을 파싱합니다. 실패하지 않으며, 해석할 수 없으면 `Other`를 반환합니다.
    pub fn parse(line: &str) -> Self {
        let payload: WirePayload = match serde_json::from_str(line) {
            Ok(p) => p,
            Err(e) => return Self::Other(format!("invalid json: {e}")),
        };

        if !payload.errors.is_empty() {
            return Self::Error(payload.errors.iter().map(WireError::describe).collect());
        }

        let Some(data) = payload.data else {
            return Self::Other("payload has no data".to_owned());
        };

        let post: WirePost = match serde_json::from_value(data) {
            Ok(p) => p,
            Err(e) => return Self::Other(format!("data is not a post: {e}")),
        };

        let included_users = payload
            .includes
            .map(|i| i.users.into_iter().map(IncludedUser::from).collect())
            .unwrap_or_default();

        Self::Post(RawItem {
            id: post.id,
            text: post.text,
            created_at: post.created_at,
            lang: post.lang,
            possibly_sensitive: post.possibly_sensitive,
            metrics: post.public_metrics,
            author_id: post.author_id,
            matching_rule_tags: payload
                .matching_rules
                .into_iter()
                .filter_map(|r| r.tag)
                .collect(),
            included_users,
        })
    }
}

// --- 와이어 포맷 ---

#[derive(Deserialize)]
struct WirePayload {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    includes: Option<WireIncludes>,
    #[serde(default)]
    matching_rules: Vec<WireMatchingRule>,
    #[serde(default)]
    errors: Vec<WireError>,
}

#[derive(Deserialize)]
struct WirePost {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    possibly_sensitive: bool,
    #[serde(default)]
    public_metrics: PostMetrics,
    #[serde(default)]
    author_id: Option<String>,
}

#[derive(Deserialize)]
struct WireIncludes {
    #[serde(default)]
    users: Vec<WireUser>,
}

#[derive(Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    public_metrics: Option<WireUserMetrics>,
}

#[derive(Deserialize)]
struct WireUserMetrics {
    #[serde(default)]
    followers_count: Option<u64>,
}

impl From<WireUser> for IncludedUser {
    fn from(user: WireUser) -> Self {
        Self {
            id: user.id,
            display_name: user.name,
            handle: user.username,
            follower_count: user.public_metrics.and_then(|m| m.followers_count),
        }
    }
}

#[derive(Deserialize)]
struct WireMatchingRule {
    #[serde(default)]
    tag: Option<String>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl WireError {
    fn describe(&self) -> String {
        match (&self.title, &self.detail, &self.message) {
            (Some(t), Some(d), _) => format!("{t}: {d}"),
            (Some(t), None, _) => t.clone(),
            (None, Some(d), _) => d.clone(),
            (None, None, Some(m)) => m.clone(),
            (None, None, None) => "unknown error".to_owned(),
        }
    }
}
