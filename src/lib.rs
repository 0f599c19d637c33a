//! # edgequake-pdf2quiz
//!
//! Extract structured exam questions from PDF papers using Vision Language
//! Models (VLMs).
//!
//! Exam papers are scanned or typeset with formulae, tables and multi-column
//! layouts that text extractors mangle. This crate rasterises the pages,
//! sends them to a VLM in bounded page-range units, and reconciles the
//! model's partial answers into one ordered, deduplicated list of questions
//! per document. A two-stage filter (file-name pre-filter, then an in-band
//! skip verdict from the model) keeps out-of-scope papers out of the dataset.
//!
//! ## Pipeline Overview
//!
//! ```text
//! directory
//!  │
//!  ├─ 1. Enumerate  recursive walk for *.pdf (walkdir)
//!  ├─ 2. Pre-filter year / exam key from the file name
//!  ├─ 3. Render     rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 4. Segment    group page images into units of ≤ pages_per_chunk
//!  ├─ 5. VLM        K concurrent unit calls, retry with linear backoff
//!  ├─ 6. Interpret  skip(document) | skip(chunk) | items
//!  ├─ 7. Reconcile  unit order, page remap, dedup
//!  └─ 8. Output     questions.json + stats.json + summary.txt per document
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2quiz::{extract_directory, ExtractionConfig, ExtractionContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let context = ExtractionContext::from_json(
//!         r#"{"exam_key": ["jee", "main"], "full_name": "JEE Main", "allowed_years": ["2023", "2024"]}"#,
//!     )?;
//!     let config = ExtractionConfig::builder().context(context).build()?;
//!     let batch = extract_directory("papers/", "out/", config).await?;
//!     eprintln!("{} questions, {} skipped documents", batch.total_questions, batch.skipped);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2quiz` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-pdf2quiz = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CategoryKey, ExtractionConfig, ExtractionConfigBuilder, ExtractionContext};
pub use error::{ExtractError, UnitError};
pub use extract::{extract_directory, extract_directory_sync, plan_directory, resolve_provider, Extractor, PlannedDocument};
pub use output::{
    BatchResult, Difficulty, DocumentMetadata, DocumentResult, Provenance, Question, QuestionType,
};
pub use pipeline::input::Document;
pub use pipeline::llm::{ExtractionService, LlmExtractionService, ServiceError, ServiceReply};
pub use pipeline::segment::{PageRange, PageRenderer, PdfiumRenderer, Unit};
pub use progress::{ExtractionObserver, NoopObserver, ProgressObserver};
pub use stream::{extract_directory_stream, extract_stream, DocumentStream};
