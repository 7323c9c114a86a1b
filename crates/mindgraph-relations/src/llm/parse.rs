//! Tolerant parsing of LLM responses.
//!
//! Responses may be wrapped in Markdown code fences or surrounded by prose.
//! JSON errors carry the line, column, character offset and a snippet of
//! the text around the failure.

use mindgraph_core::{MindGraphError, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

const SNIPPET_RADIUS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "malformed JSON at line {line}, column {column} (offset {offset}): {message} near `{snippet}`"
)]
pub struct ResponseParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    /// Character offset into the parsed text.
    pub offset: usize,
    pub snippet: String,
}

impl ResponseParseError {
    fn from_serde(err: &serde_json::Error, text: &str) -> Self {
        let offset = char_offset(text, err.line(), err.column());
        Self {
            message: err.to_string(),
            line: err.line(),
            column: err.column(),
            offset,
            snippet: context_snippet(text, offset, SNIPPET_RADIUS),
        }
    }
}

/// Character offset of a 1-based `(line, column)` position, where `column`
/// counts bytes within the line as serde_json reports it.
pub fn char_offset(text: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (idx, content) in text.split('\n').enumerate() {
        if idx + 1 == line {
            let mut end = column.saturating_sub(1).min(content.len());
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            return offset + content[..end].chars().count();
        }
        offset += content.chars().count() + 1;
    }
    text.chars().count()
}

/// Up to `radius` characters either side of `offset`, newlines flattened.
pub fn context_snippet(text: &str, offset: usize, radius: usize) -> String {
    let start = offset.saturating_sub(radius);
    text.chars()
        .skip(start)
        .take(radius * 2)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

pub struct ResponseParser {
    fence: Regex,
}

impl ResponseParser {
    pub fn new() -> Result<Self> {
        let fence = Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```")
            .map_err(|e| MindGraphError::Parse(format!("invalid fence pattern: {}", e)))?;
        Ok(Self { fence })
    }

    /// Content of the first fenced block, or the trimmed text when there is
    /// none. An unterminated opening fence is dropped.
    pub fn strip_code_fences<'a>(&self, text: &'a str) -> &'a str {
        if let Some(inner) = self.fence.captures(text).and_then(|c| c.get(1)) {
            return inner.as_str().trim();
        }
        let trimmed = text.trim();
        if trimmed.starts_with("```") {
            return match trimmed.find('\n') {
                Some(newline) => trimmed[newline + 1..].trim(),
                None => "",
            };
        }
        trimmed
    }

    /// Deserialize a fenced or bare JSON payload. When the payload does not
    /// parse, the outermost `{...}` span is tried before giving up; the
    /// reported error always refers to the first attempt.
    pub fn parse_json<T: DeserializeOwned>(
        &self,
        raw: &str,
    ) -> std::result::Result<T, ResponseParseError> {
        let text = self.strip_code_fences(raw);
        match serde_json::from_str::<T>(text) {
            Ok(value) => Ok(value),
            Err(first) => {
                if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
                    if start > 0 || end + 1 < text.len() {
                        if let Ok(value) = serde_json::from_str::<T>(&text[start..=end]) {
                            return Ok(value);
                        }
                    }
                }
                Err(ResponseParseError::from_serde(&first, text))
            }
        }
    }
}

/// An item reference in an LLM response: an index as a number or a string
/// such as `"3"`, `"#3"` or `"[3]"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IndexRef {
    Index(i64),
    Text(String),
}

impl IndexRef {
    /// The index when it is within `0..len`.
    pub fn resolve(&self, len: usize) -> Option<usize> {
        let index = match self {
            IndexRef::Index(i) => *i,
            IndexRef::Text(s) => s
                .trim()
                .trim_start_matches('#')
                .trim_start_matches('[')
                .trim_end_matches(']')
                .trim()
                .parse::<i64>()
                .ok()?,
        };
        usize::try_from(index).ok().filter(|i| *i < len)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRelation {
    pub source: IndexRef,
    pub target: IndexRef,
    #[serde(rename = "type")]
    pub relation_type: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelationsResponse {
    #[serde(default)]
    pub relations: Vec<RawRelation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ResponseParser {
        ResponseParser::new().unwrap()
    }

    #[test]
    fn test_strip_fences() {
        let p = parser();
        assert_eq!(p.strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(p.strip_code_fences("Here:\n```\n[1]\n```\nthanks"), "[1]");
        assert_eq!(p.strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(p.strip_code_fences("```json\n{\"a\": 1"), "{\"a\": 1");
    }

    #[test]
    fn test_parse_relations_with_mixed_indices() {
        let raw = r##"```json
{"relations": [
  {"source": 0, "target": "2", "type": "why", "reason": "because"},
  {"source": "#1", "target": 7, "type": "how"}
]}
```"##;
        let parsed: RelationsResponse = parser().parse_json(raw).unwrap();
        assert_eq!(parsed.relations.len(), 2);
        assert_eq!(parsed.relations[0].target.resolve(3), Some(2));
        assert_eq!(parsed.relations[1].source.resolve(3), Some(1));
        assert_eq!(parsed.relations[1].target.resolve(3), None);
        assert_eq!(IndexRef::Index(-1).resolve(3), None);
    }

    #[test]
    fn test_prose_around_json() {
        let raw = "Sure! {\"relations\": []} Hope this helps.";
        let parsed: RelationsResponse = parser().parse_json(raw).unwrap();
        assert!(parsed.relations.is_empty());
    }

    #[test]
    fn test_error_position() {
        let raw = "{\n  \"relations\": [\n    {\"source\": 0,, \"target\": 1}\n  ]\n}";
        let err = parser().parse_json::<RelationsResponse>(raw).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.column > 0);
        let expected_offset = "{\n  \"relations\": [\n".chars().count() + err.column - 1;
        assert_eq!(err.offset, expected_offset);
        assert!(err.snippet.contains("\"source\": 0,,"));
    }

    #[test]
    fn test_char_offset_multibyte() {
        let text = "héllo\nwörld";
        // Column 4 is the byte after the two-byte `ö`.
        assert_eq!(char_offset(text, 2, 4), 8);
        assert_eq!(char_offset(text, 2, 3), 7);
        assert_eq!(char_offset(text, 9, 1), text.chars().count());
    }

    #[test]
    fn test_error_offset_after_multibyte_text() {
        let raw = "{\"relations\": [{\"reason\": \"über größe\",, \"source\": 0}]}";
        let err = parser().parse_json::<RelationsResponse>(raw).unwrap_err();
        let comma = raw.find(",,").unwrap() + 1;
        assert_eq!(err.offset, raw[..comma].chars().count());
        assert_eq!(raw.chars().nth(err.offset), Some(','));
    }
}
