//! Output artifacts: per-document JSON, statistics and summaries.
//!
//! For every document that went through extraction, three files land in the
//! output directory:
//!
//! | File                     | Content                                    |
//! |--------------------------|--------------------------------------------|
//! | `<stem>.questions.json`  | ordered array of `Question` records        |
//! | `<stem>.stats.json`      | [`DocumentStats`]                          |
//! | `<stem>.summary.txt`     | human-readable summary                     |
//!
//! A batch additionally writes `batch_summary.json`. All writes are atomic
//! (temp file + rename) so a crash never leaves a truncated artifact.

use crate::error::ExtractError;
use crate::output::{BatchResult, DocumentResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const BATCH_SUMMARY_FILE: &str = "batch_summary.json";

/// Counts over one document's questions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentStats {
    pub document: String,
    pub total_questions: usize,
    pub by_subject: BTreeMap<String, usize>,
    pub by_difficulty: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub by_topic: BTreeMap<String, usize>,
    pub average_confidence: f32,
    pub pages_with_questions: usize,
}

impl DocumentStats {
    pub fn from_result(result: &DocumentResult) -> Self {
        let qs = &result.questions;
        let mut stats = DocumentStats {
            document: result.document.clone(),
            total_questions: qs.len(),
            ..Default::default()
        };

        for q in qs {
            let subject = q.subject.clone().unwrap_or_else(|| "unspecified".to_string());
            *stats.by_subject.entry(subject).or_default() += 1;
            *stats.by_difficulty.entry(q.difficulty.to_string()).or_default() += 1;
            *stats.by_type.entry(q.kind.to_string()).or_default() += 1;
            for topic in &q.topics {
                *stats.by_topic.entry(topic.clone()).or_default() += 1;
            }
        }

        if !qs.is_empty() {
            stats.average_confidence = qs.iter().map(|q| q.confidence).sum::<f32>() / qs.len() as f32;
        }
        let mut pages: Vec<usize> = qs.iter().map(|q| q.provenance.page).collect();
        pages.sort_unstable();
        pages.dedup();
        stats.pages_with_questions = pages.len();
        stats
    }
}

/// Render the human-readable summary of one document.
pub fn render_summary(result: &DocumentResult, stats: &DocumentStats) -> String {
    let m = &result.metadata;
    let status = match (&m.skipped_reason, result.success) {
        (Some(reason), _) => format!("skipped ({reason})"),
        (None, true) => "success".to_string(),
        (None, false) => "failed".to_string(),
    };

    let mut out = String::new();
    let _ = writeln!(out, "Document:   {}", result.document);
    if let Some(exam) = &m.exam {
        let _ = writeln!(out, "Exam:       {}", exam);
    }
    if let Some(year) = &m.detected_year {
        let _ = writeln!(out, "Year:       {}", year);
    }
    let _ = writeln!(out, "Status:     {}", status);
    let _ = writeln!(out, "Pages:      {} in {} units", m.total_pages, m.units);
    let _ = writeln!(out, "Questions:  {}", stats.total_questions);
    let _ = writeln!(out, "Tokens:     {} in / {} out", m.input_tokens, m.output_tokens);
    let _ = writeln!(out, "Duration:   {} ms", m.duration_ms);

    for (title, counts) in [
        ("By subject", &stats.by_subject),
        ("By difficulty", &stats.by_difficulty),
        ("By type", &stats.by_type),
        ("By topic", &stats.by_topic),
    ] {
        if counts.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{title}:");
        for (key, n) in counts {
            let _ = writeln!(out, "  {key}: {n}");
        }
    }

    for (title, lines) in [("Skip notes", &m.skip_notes), ("Errors", &result.errors)] {
        if lines.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{title}:");
        for line in lines {
            let _ = writeln!(out, "  - {line}");
        }
    }
    out
}

/// Paths written for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub questions: PathBuf,
    pub stats: PathBuf,
    pub summary: PathBuf,
}

/// File stem for a document's artifacts: its identifier without `.pdf`.
pub fn artifact_stem(document: &str) -> String {
    Path::new(document)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| document.to_string())
}

/// One stem per document, in order. Same-named papers from different
/// directories get `-2`, `-3`, … so no document overwrites another.
pub fn unique_stems<'a>(documents: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    documents
        .into_iter()
        .map(|doc| {
            let base = artifact_stem(doc);
            let mut stem = base.clone();
            let mut n = 1;
            while !used.insert(stem.clone()) {
                n += 1;
                stem = format!("{base}-{n}");
            }
            stem
        })
        .collect()
}

/// Write the three per-document artifacts into `out_dir`.
pub async fn write_document_artifacts(
    out_dir: &Path,
    result: &DocumentResult,
) -> Result<ArtifactPaths, ExtractError> {
    write_artifacts_as(out_dir, &artifact_stem(&result.document), result).await
}

async fn write_artifacts_as(
    out_dir: &Path,
    stem: &str,
    result: &DocumentResult,
) -> Result<ArtifactPaths, ExtractError> {
    let paths = ArtifactPaths {
        questions: out_dir.join(format!("{stem}.questions.json")),
        stats: out_dir.join(format!("{stem}.stats.json")),
        summary: out_dir.join(format!("{stem}.summary.txt")),
    };
    let stats = DocumentStats::from_result(result);

    write_atomic(&paths.questions, to_json(&paths.questions, &result.questions)?.as_bytes()).await?;
    write_atomic(&paths.stats, to_json(&paths.stats, &stats)?.as_bytes()).await?;
    write_atomic(&paths.summary, render_summary(result, &stats).as_bytes()).await?;

    debug!("{}: wrote artifacts to {}", result.document, out_dir.display());
    Ok(paths)
}

#[derive(Serialize)]
struct BatchSummary<'a> {
    files_found: usize,
    processed: usize,
    skipped: usize,
    succeeded: usize,
    failed: usize,
    total_questions: usize,
    success: bool,
    duration_ms: u64,
    errors: &'a [String],
    documents: Vec<DocumentLine<'a>>,
}

#[derive(Serialize)]
struct DocumentLine<'a> {
    document: &'a str,
    success: bool,
    questions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped_reason: Option<&'a str>,
    /// Stem of the written artifacts; absent for skipped documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    artifacts: Option<&'a str>,
    errors: &'a [String],
}

/// Write `batch_summary.json` into `out_dir`.
pub async fn write_batch_summary(out_dir: &Path, batch: &BatchResult) -> Result<PathBuf, ExtractError> {
    let stems = batch_stems(batch);
    write_summary(out_dir, batch, &stems).await
}

/// Artifact stem per document; `None` for skipped ones.
fn batch_stems(batch: &BatchResult) -> Vec<Option<String>> {
    let written: Vec<&DocumentResult> = batch.documents.iter().filter(|d| !d.is_skipped()).collect();
    let mut stems = unique_stems(written.iter().map(|d| d.document.as_str())).into_iter();
    batch
        .documents
        .iter()
        .map(|d| if d.is_skipped() { None } else { stems.next() })
        .collect()
}

async fn write_summary(
    out_dir: &Path,
    batch: &BatchResult,
    stems: &[Option<String>],
) -> Result<PathBuf, ExtractError> {
    let summary = BatchSummary {
        files_found: batch.files_found,
        processed: batch.processed,
        skipped: batch.skipped,
        succeeded: batch.succeeded,
        failed: batch.failed,
        total_questions: batch.total_questions,
        success: batch.success(),
        duration_ms: batch.duration_ms,
        errors: &batch.errors,
        documents: batch
            .documents
            .iter()
            .zip(stems)
            .map(|(d, stem)| DocumentLine {
                document: &d.document,
                success: d.success,
                questions: d.questions.len(),
                skipped_reason: d.metadata.skipped_reason.as_deref(),
                artifacts: stem.as_deref(),
                errors: &d.errors,
            })
            .collect(),
    };
    let path = out_dir.join(BATCH_SUMMARY_FILE);
    write_atomic(&path, to_json(&path, &summary)?.as_bytes()).await?;
    Ok(path)
}

/// Write artifacts for every extracted document plus the batch summary.
///
/// Documents excluded by a filter stage only appear in the batch summary.
pub async fn write_batch(out_dir: &Path, batch: &BatchResult) -> Result<(), ExtractError> {
    let stems = batch_stems(batch);
    let mut written = 0;
    for (doc, stem) in batch.documents.iter().zip(&stems) {
        if let Some(stem) = stem {
            write_artifacts_as(out_dir, stem, doc).await?;
            written += 1;
        }
    }
    let path = write_summary(out_dir, batch, &stems).await?;
    info!("Wrote artifacts for {} documents and {}", written, path.display());
    Ok(())
}

fn to_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<String, ExtractError> {
    serde_json::to_string_pretty(value).map_err(|e| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })
}

/// Atomic write: write to a sibling temp file, then rename over the target.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ExtractError> {
    let fail = |source: std::io::Error| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}
