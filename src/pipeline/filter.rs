//! Deterministic pre-filter: decide from the identifier alone whether a
//! document is worth sending to the model.
//!
//! This is the cheap half of the filtering policy. The expensive half runs
//! inside every extraction call: the model may answer with a skip object
//! (see [`crate::pipeline::response`]) when the page content itself shows the
//! paper is out of scope.
//!
//! Year candidates are tried in a fixed order and the first match wins:
//!
//! 1. a 4-digit year (`19xx` / `20xx`) delimited by non-digits
//! 2. a 2-digit year delimited by separators (`_23.pdf`, `'98`)
//! 3. `year_NNNN`
//! 4. `NNNN_paper`

use crate::config::ExtractionContext;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static RE_YEAR_4: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})(?:[^0-9]|$)").unwrap());
static RE_YEAR_2: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[_\-\s'.])(\d{2})(?:[_\-\s.]|$)").unwrap());
static RE_YEAR_PREFIXED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)year[_\-\s]?(\d{4})").unwrap());
static RE_YEAR_PAPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{4})[_\-\s]?paper").unwrap());

/// Normalise a year to 4 digits.
///
/// 4-digit input is returned unchanged; 2-digit input maps to `20xx` when
/// `<= 30` and to `19xx` otherwise. Anything else is `None`.
pub fn normalize_year(raw: &str) -> Option<String> {
    let s = raw.trim().trim_start_matches('\'');
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match s.len() {
        4 => Some(s.to_string()),
        2 => {
            let n: u32 = s.parse().ok()?;
            let century = if n <= 30 { 2000 } else { 1900 };
            Some((century + n).to_string())
        }
        _ => None,
    }
}

/// Guess the exam year from a document identifier.
pub fn detect_year(identifier: &str) -> Option<String> {
    [&*RE_YEAR_4, &*RE_YEAR_2, &*RE_YEAR_PREFIXED, &*RE_YEAR_PAPER]
        .iter()
        .find_map(|re| re.captures(identifier).and_then(|c| normalize_year(&c[1])))
}

/// Why a document passed or failed the pre-filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreFilterDecision {
    /// No allowed years configured.
    NoYearFilter,
    /// Detected year is in the allowed set.
    YearAllowed { year: String },
    /// Detected year is not in the allowed set.
    YearMismatch { year: String, allowed: Vec<String> },
    /// No year found; strict filtering is off, so the document proceeds.
    NoYearPermissive,
    /// No year found and strict filtering is on.
    NoYearStrict,
    /// Identifier lacks one of the exam-key tokens (only with `category_gate`).
    CategoryMismatch { key: String },
}

impl PreFilterDecision {
    pub fn should_process(&self) -> bool {
        matches!(
            self,
            PreFilterDecision::NoYearFilter
                | PreFilterDecision::YearAllowed { .. }
                | PreFilterDecision::NoYearPermissive
        )
    }
}

impl fmt::Display for PreFilterDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreFilterDecision::NoYearFilter => f.write_str("no year filter configured"),
            PreFilterDecision::YearAllowed { year } => write!(f, "year {year} allowed"),
            PreFilterDecision::YearMismatch { year, allowed } => {
                write!(f, "year mismatch: detected {year}, allowed {}", allowed.join(", "))
            }
            PreFilterDecision::NoYearPermissive => {
                f.write_str("no year detected, filtering disabled")
            }
            PreFilterDecision::NoYearStrict => {
                f.write_str("no year detected, strict filtering enabled")
            }
            PreFilterDecision::CategoryMismatch { key } => {
                write!(f, "category mismatch: identifier lacks exam key '{key}'")
            }
        }
    }
}

/// Apply the pre-filter decision table to an identifier.
pub fn should_process(identifier: &str, context: &ExtractionContext) -> PreFilterDecision {
    if context.category_gate && !context.exam_key.matches(identifier) {
        return PreFilterDecision::CategoryMismatch {
            key: context.exam_key.to_string(),
        };
    }

    if context.allowed_years.is_empty() {
        return PreFilterDecision::NoYearFilter;
    }

    match detect_year(identifier) {
        Some(year) if context.allowed_years.contains(&year) => PreFilterDecision::YearAllowed { year },
        Some(year) => PreFilterDecision::YearMismatch {
            year,
            allowed: context.allowed_years.iter().cloned().collect(),
        },
        None if context.strict_filtering => PreFilterDecision::NoYearStrict,
        None => PreFilterDecision::NoYearPermissive,
    }
}

/// Counts from a pre-filter pass over a batch. An estimate only: the model
/// may still skip documents that pass here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreFilterEstimate {
    pub would_process: usize,
    pub would_skip: usize,
}

pub fn estimate<'a, I>(identifiers: I, context: &ExtractionContext) -> PreFilterEstimate
where
    I: IntoIterator<Item = &'a str>,
{
    identifiers
        .into_iter()
        .fold(PreFilterEstimate::default(), |mut acc, id| {
            if should_process(id, context).should_process() {
                acc.would_process += 1;
            } else {
                acc.would_skip += 1;
            }
            acc
        })
}
