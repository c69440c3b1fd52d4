//! 분류 전 텍스트 정규화
//!
//! `@handle` 멘션, 맨 앞의 `RT ` 마커, `http(s)://` URL을 공백으로 바꾼 뒤
//! 연속 공백을 하나로 합칩니다.

use regex::Regex;

use crate::error::StreamPipelineError;

const STRIP_PATTERN: &str = r"(@[A-Za-z0-9_]+)|(^RT )|(https?://\S+)";

/// 텍스트 정규화기 -- 정규식을 한 번만 컴파일해 워커 간에 공유합니다.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    strip: Regex,
}

impl TextNormalizer {
    /// 정규화기를 생성합니다.
    pub fn new() -> Result<Self, StreamPipelineError> {
        let strip = Regex::new(STRIP_PATTERN).map_err(|e| StreamPipelineError::Config {
            field: "normalizer".to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self { strip })
    }

    /// 텍스트를 정규화합니다.
    pub fn normalize(&self, text: &str) -> String {
        let stripped = self.strip.replace_all(text, " ");
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}
