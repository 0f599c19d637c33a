//! Streaming extraction API: emit documents as they complete.
//!
//! Unlike [`crate::extract::Extractor::process_batch`], which returns only
//! after every document finishes, [`extract_stream`] yields each
//! [`DocumentResult`] as soon as it is ready. At most
//! `document_concurrency` documents are in flight; results arrive in
//! completion order, not input order.

use crate::error::ExtractError;
use crate::extract::Extractor;
use crate::output::{DocumentMetadata, DocumentResult};
use crate::pipeline::dispatch::panic_message;
use crate::pipeline::input::{self, document_id};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_stream::Stream;
use tracing::{info, warn};

/// A boxed stream of document results.
pub type DocumentStream = Pin<Box<dyn Stream<Item = DocumentResult> + Send>>;

/// Process `paths`, yielding each document's result as it completes.
///
/// `document_delay_ms` is applied before every document after the first,
/// as in [`Extractor::process_batch`].
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2quiz::{extract_stream, ExtractionConfig, Extractor};
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let extractor = Arc::new(Extractor::from_config(ExtractionConfig::default())?);
/// let mut stream = extract_stream(extractor, vec!["papers/neet_2023.pdf".into()]);
/// while let Some(doc) = stream.next().await {
///     println!("{}: {} questions", doc.document, doc.questions.len());
/// }
/// # Ok(())
/// # }
/// ```
pub fn extract_stream(extractor: Arc<Extractor>, paths: Vec<PathBuf>) -> DocumentStream {
    let concurrency = extractor.config().document_concurrency.max(1);
    let document_delay = Duration::from_millis(extractor.config().document_delay_ms);
    info!("Streaming {} documents, {} concurrent", paths.len(), concurrency);

    let s = stream::iter(paths.into_iter().enumerate().map(move |(index, path)| {
        let extractor = Arc::clone(&extractor);
        async move {
            let fut = async {
                if index > 0 && !document_delay.is_zero() {
                    sleep(document_delay).await;
                }
                extractor.process_path(&path).await
            };
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let id = document_id(&path);
                    let msg = panic_message(payload);
                    warn!("{}: document processing panicked: {}", id, msg);
                    DocumentResult::failed(id, format!("panicked: {msg}"), DocumentMetadata::default())
                }
            }
        }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}

/// Enumerate every PDF under `root` and stream their results.
///
/// # Errors
/// Enumeration failures only; per-document problems stay in each result.
pub fn extract_directory_stream(
    extractor: Arc<Extractor>,
    root: impl AsRef<Path>,
) -> Result<DocumentStream, ExtractError> {
    let paths = input::enumerate_documents(root.as_ref())?;
    Ok(extract_stream(extractor, paths))
}
