//! Interpretation of raw model text as a closed response type.
//!
//! The model answers in free text that should contain exactly one JSON
//! value: a skip object, an item array, or a wrapper object with an item
//! array inside. [`parse_response`] locates that value and classifies it.
//! Skip detection runs before any item extraction, so a malformed reply that
//! carries both a skip flag and items is treated as a skip.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").unwrap());
static RE_YEAR_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\byears?\b|\b(?:19|20)\d{2}\b").unwrap());

/// How much of the document a skip applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipScope {
    /// The whole document is out of scope.
    Document,
    /// Only the current unit carries nothing to extract.
    Chunk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipDirective {
    pub scope: SkipScope,
    pub reason: String,
}

/// A successfully interpreted model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    Skip(SkipDirective),
    /// Raw item objects, not yet normalised.
    Items(Vec<Value>),
}

/// The reply could not be interpreted. Retried like a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    Empty,
    NoJson,
    UnexpectedShape(&'static str),
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseError::Empty => f.write_str("empty response"),
            ResponseError::NoJson => f.write_str("no JSON value found in response"),
            ResponseError::UnexpectedShape(what) => write!(f, "unexpected response shape: {what}"),
        }
    }
}

impl std::error::Error for ResponseError {}

/// Interpret a raw reply.
pub fn parse_response(text: &str) -> Result<ModelResponse, ResponseError> {
    if text.trim().is_empty() {
        return Err(ResponseError::Empty);
    }
    let value = locate_json(text).ok_or(ResponseError::NoJson)?;
    classify(value)
}

/// Find the JSON payload: a fenced block first, then the first `[` or `{`
/// from which a complete value deserialises.
pub fn locate_json(text: &str) -> Option<Value> {
    for caps in RE_FENCED.captures_iter(text) {
        if let Some(v) = first_value(caps[1].trim()) {
            return Some(v);
        }
    }
    first_value(text)
}

fn first_value(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| *c == '[' || *c == '{')
        .find_map(|(idx, _)| {
            serde_json::Deserializer::from_str(&text[idx..])
                .into_iter::<Value>()
                .next()
                .and_then(Result::ok)
                .filter(|v| v.is_array() || v.is_object())
        })
}

fn classify(value: Value) -> Result<ModelResponse, ResponseError> {
    match value {
        Value::Object(map) => {
            if let Some(skip) = skip_directive(&map) {
                return Ok(ModelResponse::Skip(skip));
            }
            item_list(map).map(ModelResponse::Items)
        }
        Value::Array(items) => {
            if let [Value::Object(only)] = items.as_slice() {
                if let Some(skip) = skip_directive(only) {
                    return Ok(ModelResponse::Skip(skip));
                }
            }
            Ok(ModelResponse::Items(items))
        }
        _ => Err(ResponseError::UnexpectedShape("scalar")),
    }
}

fn skip_directive(map: &Map<String, Value>) -> Option<SkipDirective> {
    let flagged = match map.get("skip") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    if !flagged {
        return None;
    }

    let reason = map
        .get("reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("no reason given")
        .to_string();

    let explicit = map
        .get("scope")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase());
    let scope = match explicit.as_deref() {
        Some("document") | Some("doc") | Some("file") => SkipScope::Document,
        Some("chunk") | Some("unit") | Some("page") | Some("pages") | Some("section") => SkipScope::Chunk,
        _ if RE_YEAR_MENTION.is_match(&reason) => SkipScope::Document,
        _ => SkipScope::Chunk,
    };

    Some(SkipDirective { scope, reason })
}

fn item_list(mut map: Map<String, Value>) -> Result<Vec<Value>, ResponseError> {
    for key in ["questions", "items"] {
        if let Some(Value::Array(items)) = map.remove(key) {
            return Ok(items);
        }
    }
    // First array of objects in document order, else the first array at all.
    let arrays = map.into_iter().filter_map(|(_, v)| match v {
        Value::Array(items) => Some(items),
        _ => None,
    });
    let mut fallback = None;
    for items in arrays {
        if items.iter().any(Value::is_object) {
            return Ok(items);
        }
        if fallback.is_none() {
            fallback = Some(items);
        }
    }
    fallback.ok_or(ResponseError::UnexpectedShape("object without an item array"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(resp: ModelResponse) -> Vec<Value> {
        match resp {
            ModelResponse::Items(v) => v,
            other => panic!("expected items, got {other:?}"),
        }
    }

    fn skip(resp: ModelResponse) -> SkipDirective {
        match resp {
            ModelResponse::Skip(s) => s,
            other => panic!("expected skip, got {other:?}"),
        }
    }

    #[test]
    fn fenced_block_is_preferred() {
        let text = "Here you go [not json]\n```json\n[{\"text\": \"Q1\"}]\n```\nThanks!";
        let v = items(parse_response(text).unwrap());
        assert_eq!(v.len(), 1);
        assert_eq!(v[0]["text"], "Q1");
    }

    #[test]
    fn bare_fence_without_language() {
        let text = "```\n{\"questions\": [{\"text\": \"A\"}, {\"text\": \"B\"}]}\n```";
        assert_eq!(items(parse_response(text).unwrap()).len(), 2);
    }

    #[test]
    fn first_bracket_with_trailing_prose() {
        let text = "Sure! {\"questions\": [{\"text\": \"A\"}]} Let me know if you need more.";
        assert_eq!(items(parse_response(text).unwrap()).len(), 1);
    }

    #[test]
    fn skips_unparseable_bracket_before_payload() {
        let text = "Pages [1-8] contain: [{\"text\": \"A\"}]";
        assert_eq!(items(parse_response(text).unwrap()).len(), 1);
    }

    #[test]
    fn items_key_and_first_array_field() {
        let v = items(parse_response(r#"{"items": [{"text": "x"}]}"#).unwrap());
        assert_eq!(v.len(), 1);
        let v = items(parse_response(r#"{"page_count": 8, "extracted": [{"text": "x"}, {"text": "y"}]}"#).unwrap());
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn object_array_wins_over_earlier_tag_list() {
        let v = items(parse_response(r#"{"results": [{"text": "Real question?"}], "meta_tags": ["physics"]}"#).unwrap());
        assert_eq!(v, vec![serde_json::json!({"text": "Real question?"})]);
        let v = items(parse_response(r#"{"a_tags": ["x", "y"], "z_extracted": [{"text": "Q"}]}"#).unwrap());
        assert_eq!(v.len(), 1);
        assert!(v[0].is_object());
    }

    #[test]
    fn explicit_scopes() {
        let s = skip(parse_response(r#"{"skip": true, "scope": "document", "reason": "different exam"}"#).unwrap());
        assert_eq!(s.scope, SkipScope::Document);
        assert_eq!(s.reason, "different exam");

        let s = skip(parse_response(r#"{"skip": "true", "scope": "chunk", "reason": "answer key section"}"#).unwrap());
        assert_eq!(s.scope, SkipScope::Chunk);
    }

    #[test]
    fn default_scope_follows_reason() {
        let s = skip(parse_response(r#"{"skip": true, "reason": "Paper is from year 2017"}"#).unwrap());
        assert_eq!(s.scope, SkipScope::Document);
        let s = skip(parse_response(r#"{"skip": true, "reason": "instructions only"}"#).unwrap());
        assert_eq!(s.scope, SkipScope::Chunk);
    }

    #[test]
    fn skip_takes_precedence_over_items() {
        let text = r#"{"skip": true, "scope": "document", "reason": "wrong exam", "questions": [{"text": "Q"}]}"#;
        assert_eq!(skip(parse_response(text).unwrap()).scope, SkipScope::Document);
    }

    #[test]
    fn skip_wrapped_in_single_element_array() {
        let text = r#"[{"skip": true, "scope": "chunk", "reason": "blank page"}]"#;
        assert_eq!(skip(parse_response(text).unwrap()).reason, "blank page");
    }

    #[test]
    fn skip_false_is_not_a_skip() {
        let v = items(parse_response(r#"{"skip": false, "questions": []}"#).unwrap());
        assert!(v.is_empty());
    }

    #[test]
    fn unusable_replies() {
        assert_eq!(parse_response("   "), Err(ResponseError::Empty));
        assert_eq!(parse_response("I could not read the pages."), Err(ResponseError::NoJson));
        assert!(matches!(
            parse_response(r#"{"note": "nothing here"}"#),
            Err(ResponseError::UnexpectedShape(_))
        ));
    }
}
