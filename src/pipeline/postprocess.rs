//! Post-processing: turn raw model items into [`Question`] records.
//!
//! Models are loose about field names and value types even with a strict
//! prompt: `"question"` instead of `"text"`, options as a letter-keyed map,
//! page numbers as strings, confidence as `"high"`. Every rule here is a
//! small pure function so the quirks can be tested one at a time.
//!
//! Page numbers are the one rule with real consequences downstream: the
//! dedup key includes the page, so a unit-relative page that slips through
//! would split duplicates and break provenance.

use crate::output::{Difficulty, Provenance, Question, QuestionType};
use crate::pipeline::segment::PageRange;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Confidence assigned when the model gives none or a non-numeric one.
pub const DEFAULT_CONFIDENCE: f32 = 0.8;

/// Where a batch of raw items came from.
#[derive(Debug, Clone, Copy)]
pub struct ItemOrigin<'a> {
    /// Document identifier recorded in provenance.
    pub document: &'a str,
    /// Prefix for generated ids.
    pub stem: &'a str,
    pub unit_index: usize,
    pub range: PageRange,
}

/// A raw item as the model sent it. Every field is optional and loosely typed.
#[derive(Debug, Default)]
struct RawItem {
    id: Option<Value>,
    text: Option<Value>,
    options: Option<Value>,
    answer: Option<Value>,
    kind: Option<Value>,
    subject: Option<Value>,
    topics: Option<Value>,
    difficulty: Option<Value>,
    tags: Option<Value>,
    page: Option<Value>,
    confidence: Option<Value>,
    char_start: Option<Value>,
    char_end: Option<Value>,
}

impl RawItem {
    /// Models often send two spellings of one field; the first usable one wins.
    fn from_map(mut map: Map<String, Value>) -> Self {
        Self {
            id: take_field(&mut map, &["id"]),
            text: take_field(&mut map, &["text", "question", "questionText", "question_text"]),
            options: take_field(&mut map, &["options", "choices"]),
            answer: take_field(&mut map, &["answer", "correct_answer", "correctAnswer"]),
            kind: take_field(&mut map, &["type", "questionType", "question_type"]),
            subject: take_field(&mut map, &["subject"]),
            topics: take_field(&mut map, &["topics", "topic"]),
            difficulty: take_field(&mut map, &["difficulty"]),
            tags: take_field(&mut map, &["tags"]),
            page: take_field(&mut map, &["page", "pageNumber", "page_number"]),
            confidence: take_field(&mut map, &["confidence"]),
            char_start: take_field(&mut map, &["char_start", "charStart"]),
            char_end: take_field(&mut map, &["char_end", "charEnd"]),
        }
    }
}

/// First of `keys` holding something other than null or a blank string.
fn take_field(map: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter().filter_map(|k| map.remove(*k)).find(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

/// Normalise every raw item from one unit, dropping the unusable ones.
///
/// Generated ids have the form `{stem}-u{unit}-q{n}` with 1-based unit and
/// item positions.
pub fn normalize_items(values: Vec<Value>, origin: ItemOrigin<'_>) -> Vec<Question> {
    let total = values.len();
    let questions: Vec<Question> = values
        .into_iter()
        .enumerate()
        .filter_map(|(pos, value)| normalize_item(value, pos, origin))
        .collect();

    if questions.len() < total {
        warn!(
            "{} pages {}: dropped {} of {} items without usable text",
            origin.document,
            origin.range,
            total - questions.len(),
            total
        );
    }
    questions
}

fn normalize_item(value: Value, pos: usize, origin: ItemOrigin<'_>) -> Option<Question> {
    let raw = match value {
        Value::Object(map) => RawItem::from_map(map),
        other => {
            debug!("{} pages {}: item {} is not an object: {}", origin.document, origin.range, pos + 1, other);
            return None;
        }
    };

    let text = raw.text.as_ref().and_then(scalar_string).map(|t| clean_text(&t))?;
    if text.is_empty() {
        return None;
    }

    let id = raw
        .id
        .as_ref()
        .and_then(scalar_string)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{}-u{}-q{}", origin.stem, origin.unit_index + 1, pos + 1));

    Some(Question {
        id,
        text,
        options: raw.options.as_ref().map(options_list).unwrap_or_default(),
        answer: raw.answer.as_ref().and_then(answer_string),
        kind: raw
            .kind
            .as_ref()
            .and_then(Value::as_str)
            .map(coerce_type)
            .unwrap_or_default(),
        subject: raw.subject.as_ref().and_then(scalar_string).filter(|s| !s.is_empty()),
        topics: raw.topics.as_ref().map(string_list).unwrap_or_default(),
        difficulty: raw
            .difficulty
            .as_ref()
            .and_then(Value::as_str)
            .map(coerce_difficulty)
            .unwrap_or_default(),
        tags: raw.tags.as_ref().map(string_list).unwrap_or_default(),
        confidence: coerce_confidence(raw.confidence.as_ref()),
        provenance: Provenance {
            source_document: origin.document.to_string(),
            page: absolute_page(raw.page.as_ref().and_then(page_number), origin.range),
            char_start: raw.char_start.as_ref().and_then(char_offset),
            char_end: raw.char_end.as_ref().and_then(char_offset),
        },
    })
}

// ── Rule 1: Page numbers ─────────────────────────────────────────────────────

/// Map a model-reported page onto document-absolute coordinates.
///
/// A value in `[1, unit length]` is read as unit-relative and shifted by the
/// unit's first page; any other positive value is trusted as absolute.
/// Missing or non-positive values fall back to the unit's first page.
pub fn absolute_page(raw: Option<i64>, range: PageRange) -> usize {
    match raw {
        Some(p) if p >= 1 && (p as usize) <= range.len() => range.from_page + p as usize - 1,
        Some(p) if p >= 1 => p as usize,
        _ => range.from_page,
    }
}

fn page_number(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Character offsets arrive as integers, floats or numeric strings.
fn char_offset(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
        }
        _ => None,
    }
}

// ── Rule 2: Question type ────────────────────────────────────────────────────

/// Coerce a free-form type label. Unrecognised labels become MCQ.
pub fn coerce_type(raw: &str) -> QuestionType {
    let key: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match key.as_str() {
        "mcq" | "multiplechoice" | "singlecorrect" | "multiplecorrect" | "objective" => QuestionType::Mcq,
        "descriptive" | "subjective" | "longanswer" | "shortanswer" | "essay" => QuestionType::Descriptive,
        "truefalse" | "tf" | "boolean" => QuestionType::TrueFalse,
        "fillin" | "fillintheblank" | "fillintheblanks" | "fillup" | "blank" => QuestionType::FillIn,
        "integer" | "numerical" | "numeric" | "integertype" => QuestionType::Integer,
        "matching" | "matchthefollowing" | "match" | "matrixmatch" => QuestionType::Matching,
        _ => QuestionType::Mcq,
    }
}

// ── Rule 3: Difficulty ───────────────────────────────────────────────────────

pub fn coerce_difficulty(raw: &str) -> Difficulty {
    match raw.trim().to_ascii_lowercase().as_str() {
        "easy" | "simple" => Difficulty::Easy,
        "medium" | "moderate" | "average" => Difficulty::Medium,
        "hard" | "difficult" | "tough" => Difficulty::Hard,
        _ => Difficulty::Unknown,
    }
}

// ── Rule 4: Confidence ───────────────────────────────────────────────────────

fn coerce_confidence(raw: Option<&Value>) -> f32 {
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0) as f32,
        _ => DEFAULT_CONFIDENCE,
    }
}

// ── Rule 5: Options, answers and lists ───────────────────────────────────────

fn options_list(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_string)
            .map(|s| clean_text(&s))
            .filter(|s| !s.is_empty())
            .collect(),
        Value::Object(map) => {
            let mut labelled: Vec<(&String, String)> = map
                .iter()
                .filter_map(|(label, text)| scalar_string(text).map(|t| (label, clean_text(&t))))
                .collect();
            labelled.sort_by_key(|(label, _)| option_order(label));
            labelled
                .into_iter()
                .map(|(label, text)| format!("{label}. {text}"))
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Numeric labels in numeric order, before any lettered ones.
fn option_order(label: &str) -> (u64, String) {
    let label = label.trim();
    (label.parse().unwrap_or(u64::MAX), label.to_ascii_lowercase())
}

fn answer_string(v: &Value) -> Option<String> {
    match v {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_string).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        other => scalar_string(other).filter(|s| !s.is_empty()),
    }
}

fn string_list(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_string)
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ── Rule 6: Text cleanup ─────────────────────────────────────────────────────

static RE_TRAILING_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+\n").unwrap());

fn clean_text(input: &str) -> String {
    let s = input.replace("\r\n", "\n").replace('\r', "\n");
    let s = s.replace(['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'], "");
    RE_TRAILING_WS.replace_all(s.trim(), "\n").into_owned()
}
