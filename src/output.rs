//! Result types: questions, per-document results and the batch aggregate.
//!
//! Every type here is `Serialize` so the CLI can dump it as JSON and the
//! [`crate::report`] writers can persist it without a second schema.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Question format as reported by the model, coerced to a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum QuestionType {
    /// Multiple choice. Also the fallback for anything unrecognised.
    #[default]
    #[serde(rename = "MCQ")]
    Mcq,
    Descriptive,
    TrueFalse,
    FillIn,
    Integer,
    Matching,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuestionType::Mcq => "MCQ",
            QuestionType::Descriptive => "Descriptive",
            QuestionType::TrueFalse => "TrueFalse",
            QuestionType::FillIn => "FillIn",
            QuestionType::Integer => "Integer",
            QuestionType::Matching => "Matching",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    #[default]
    Unknown,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Where a question came from. `page` is always document-absolute (1-based).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_document: String,
    pub page: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_start: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_end: Option<u64>,
}

/// One extracted exam question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Model-reported confidence in `[0, 1]`.
    pub confidence: f32,
    pub provenance: Provenance,
}

/// Bookkeeping attached to every [`DocumentResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Set when either filter stage excluded the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    pub total_pages: usize,
    pub units: usize,
    /// Chunk-skips declared by the model, as `"pages A-B: reason"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    /// RFC 3339 timestamp of when processing finished.
    pub processed_at: String,
}

/// Outcome of processing one document.
///
/// Invariant: when `metadata.skipped_reason` is set, `questions` is empty and
/// `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document: String,
    pub success: bool,
    pub questions: Vec<Question>,
    pub errors: Vec<String>,
    pub metadata: DocumentMetadata,
}

impl DocumentResult {
    /// A document excluded by a filter stage.
    pub fn skipped(document: impl Into<String>, reason: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            document: document.into(),
            success: false,
            questions: Vec::new(),
            errors: Vec::new(),
            metadata: DocumentMetadata {
                skipped_reason: Some(reason.into()),
                ..metadata
            },
        }
    }

    /// A document that could not be processed at all.
    pub fn failed(document: impl Into<String>, error: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            document: document.into(),
            success: false,
            questions: Vec::new(),
            errors: vec![error.into()],
            metadata,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.metadata.skipped_reason.is_some()
    }
}

/// Aggregate over every document in a run. Built once by folding results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub files_found: usize,
    /// Documents that went through extraction (not excluded by a filter).
    pub processed: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_questions: usize,
    /// Per-document errors, prefixed with the document id.
    pub errors: Vec<String>,
    pub documents: Vec<DocumentResult>,
    pub duration_ms: u64,
}

impl BatchResult {
    /// Fold document results into a batch summary.
    pub fn from_documents(documents: Vec<DocumentResult>, duration_ms: u64) -> Self {
        let mut batch = BatchResult {
            files_found: documents.len(),
            duration_ms,
            ..Default::default()
        };
        for doc in &documents {
            if doc.is_skipped() {
                batch.skipped += 1;
            } else {
                batch.processed += 1;
                if doc.success {
                    batch.succeeded += 1;
                } else {
                    batch.failed += 1;
                }
            }
            batch.total_questions += doc.questions.len();
            batch
                .errors
                .extend(doc.errors.iter().map(|e| format!("{}: {}", doc.document, e)));
        }
        batch.documents = documents;
        batch
    }

    /// A batch fails only when no document in it succeeded.
    pub fn success(&self) -> bool {
        self.succeeded > 0
    }
}
