//! Reconciliation: fold a document's unit reports into one result.
//!
//! Reports are consumed in unit order. A document-skip anywhere
//! short-circuits the fold and discards everything else, including units
//! that finished before it. Chunk-skips become skip notes, unit errors become
//! document errors, and item lists are concatenated then deduplicated.

use crate::output::{DocumentMetadata, DocumentResult, Question};
use crate::pipeline::llm::{UnitOutcome, UnitReport};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Reason recorded when strict mode turns an empty extraction into a skip.
pub const STRICT_EMPTY_REASON: &str = "extraction yielded nothing under strict mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub strict: bool,
    /// Characters of normalised text in the dedup key.
    pub dedup_prefix_chars: usize,
}

/// Fold unit reports into a [`DocumentResult`].
///
/// `metadata` arrives with the document-level fields already set; unit and
/// token counts are filled in here.
pub fn reconcile(
    document: &str,
    mut reports: Vec<UnitReport>,
    mut metadata: DocumentMetadata,
    options: ReconcileOptions,
) -> DocumentResult {
    reports.sort_by_key(|r| r.index);
    metadata.units = reports.len();
    metadata.input_tokens = reports.iter().map(|r| r.input_tokens).sum();
    metadata.output_tokens = reports.iter().map(|r| r.output_tokens).sum();

    let mut items: Vec<Question> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for report in reports {
        match report.outcome {
            UnitOutcome::DocumentSkip(reason) => {
                info!("{}: skipped by content check at pages {}: {}", document, report.range, reason);
                return DocumentResult::skipped(document, reason, metadata);
            }
            UnitOutcome::UnitSkip(reason) => {
                metadata
                    .skip_notes
                    .push(format!("pages {}: {}", report.range, reason));
            }
            UnitOutcome::Error(e) => errors.push(format!("pages {}: {}", report.range, e)),
            UnitOutcome::Items(mut qs) => items.append(&mut qs),
        }
    }

    let found = items.len();
    let mut questions = dedup(items, options.dedup_prefix_chars);
    if questions.len() < found {
        debug!("{}: removed {} duplicate questions", document, found - questions.len());
    }
    make_ids_unique(&mut questions);

    if questions.is_empty() {
        if options.strict {
            info!("{}: {}", document, STRICT_EMPTY_REASON);
            let mut result = DocumentResult::skipped(document, STRICT_EMPTY_REASON, metadata);
            result.errors = errors;
            return result;
        }
        if errors.is_empty() {
            errors.push("no questions extracted".to_string());
        }
        return DocumentResult {
            document: document.to_string(),
            success: false,
            questions,
            errors,
            metadata,
        };
    }

    DocumentResult {
        document: document.to_string(),
        success: true,
        questions,
        errors,
        metadata,
    }
}

/// Dedup key: absolute page plus the first `prefix_chars` characters of the
/// whitespace-collapsed, lower-cased text.
pub fn dedup_key(question: &Question, prefix_chars: usize) -> (usize, String) {
    let normalised: String = question
        .text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    (
        question.provenance.page,
        normalised.chars().take(prefix_chars).collect(),
    )
}

/// Keep the first occurrence of every dedup key, preserving order.
pub fn dedup(items: Vec<Question>, prefix_chars: usize) -> Vec<Question> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|q| seen.insert(dedup_key(q, prefix_chars)))
        .collect()
}

/// Suffix repeated ids with `-2`, `-3`, ... in order of appearance.
fn make_ids_unique(questions: &mut [Question]) {
    let mut taken: HashSet<String> = questions.iter().map(|q| q.id.clone()).collect();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for q in questions.iter_mut() {
        let count = seen.entry(q.id.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            continue;
        }
        let mut n = *count;
        let mut candidate = format!("{}-{}", q.id, n);
        while taken.contains(&candidate) {
            n += 1;
            candidate = format!("{}-{}", q.id, n);
        }
        taken.insert(candidate.clone());
        q.id = candidate;
    }
}
