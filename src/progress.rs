//! Observer trait for batch, document and unit events.
//!
//! Inject an [`Arc<dyn ExtractionObserver>`] via
//! [`crate::config::ExtractionConfigBuilder::observer`] to receive events as
//! the pipeline runs. The core never prints anything itself; progress bars,
//! log lines and counters all live behind this trait.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2quiz::{ExtractionConfig, ExtractionObserver, PageRange};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct QuestionCounter {
//!     found: AtomicUsize,
//! }
//!
//! impl ExtractionObserver for QuestionCounter {
//!     fn on_unit_complete(&self, _document: &str, _range: PageRange, questions: usize) {
//!         self.found.fetch_add(questions, Ordering::Relaxed);
//!     }
//! }
//!
//! let counter = Arc::new(QuestionCounter { found: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .observer(counter as Arc<dyn ExtractionObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{BatchResult, DocumentResult};
use crate::pipeline::segment::PageRange;
use std::sync::Arc;

/// Called by the pipeline as it processes documents and units.
///
/// Implementations must be `Send + Sync`: unit and document events fire
/// concurrently from both dispatch layers. All methods default to no-ops.
pub trait ExtractionObserver: Send + Sync {
    /// Called once after enumeration, before any document is dispatched.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document has been segmented and its units are about to run.
    fn on_document_start(&self, document: &str, units: usize) {
        let _ = (document, units);
    }

    /// Called when a unit produced questions (possibly zero).
    fn on_unit_complete(&self, document: &str, range: PageRange, questions: usize) {
        let _ = (document, range, questions);
    }

    /// Called when the model declared a unit or the whole document out of scope.
    fn on_unit_skipped(&self, document: &str, range: PageRange, reason: &str) {
        let _ = (document, range, reason);
    }

    /// Called when a unit failed after its retries.
    fn on_unit_error(&self, document: &str, range: PageRange, error: &str) {
        let _ = (document, range, error);
    }

    /// Called once per document with its final result, including skips.
    fn on_document_complete(&self, result: &DocumentResult) {
        let _ = result;
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, batch: &BatchResult) {
        let _ = batch;
    }
}

/// Observer that ignores every event. Used when none is configured.
pub struct NoopObserver;

impl ExtractionObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressObserver = Arc<dyn ExtractionObserver>;
