//! Pipeline stages for exam-question extraction.
//!
//! Each submodule implements exactly one step, so each can be tested alone.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ filter ──▶ render ──▶ segment ──▶ dispatch(llm) ──▶ reconcile
//! (walkdir)  (year)    (pdfium)   (units)     (VLM, K units)    (dedup)
//! ```
//!
//! 1. [`input`]: enumerate PDFs under a root and load them once
//! 2. [`filter`]: deterministic pre-filter on the identifier (year, exam key)
//! 3. [`render`]: rasterise and PNG-encode every page in `spawn_blocking`,
//!    since pdfium is not async-safe
//! 4. [`segment`]: group pages into bounded page-range units
//! 5. [`dispatch`]: bounded-concurrency runner with per-item isolation,
//!    used for units and for documents
//! 6. [`llm`]: the extraction service boundary and the unit processor,
//!    built on [`retry`], [`response`] and [`postprocess`]
//! 7. [`reconcile`]: fold unit outcomes into one deduplicated document result

pub mod dispatch;
pub mod filter;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod reconcile;
pub mod render;
pub mod response;
pub mod retry;
pub mod segment;
