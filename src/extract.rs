//! Eager extraction entry points: documents, batches and directories.
//!
//! [`Extractor`] owns the two seams of the pipeline, the page renderer and
//! the extraction service, and drives every document through
//!
//! ```text
//! pre-filter ─▶ load ─▶ render ─▶ segment ─▶ dispatch(process_unit, K units) ─▶ reconcile
//! ```
//!
//! Batches run the same per-document flow under a second bounded-concurrency
//! layer. Results are returned only after every document finishes; use
//! [`crate::stream::extract_stream`] to receive them as they complete.

use crate::config::{ExtractionConfig, ExtractionContext};
use crate::error::ExtractError;
use crate::output::{BatchResult, DocumentMetadata, DocumentResult};
use crate::pipeline::dispatch::{run_bounded, TaskFailure};
use crate::pipeline::filter::{self, PreFilterDecision};
use crate::pipeline::input::{self, document_id, Document};
use crate::pipeline::llm::{process_unit, ExtractionService, LlmExtractionService, UnitOutcome, UnitReport, UnitScope};
use crate::pipeline::reconcile::{reconcile, ReconcileOptions};
use crate::pipeline::segment::{segment, PageRenderer, PdfiumRenderer, Unit};
use crate::progress::ExtractionObserver;
use crate::report;
use edgequake_llm::{LLMProvider, ProviderFactory};
use serde::Serialize;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Runs the extraction pipeline over documents and batches.
pub struct Extractor {
    service: Arc<dyn ExtractionService>,
    renderer: Arc<dyn PageRenderer>,
    config: ExtractionConfig,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Extractor {
    /// Build an extractor from explicit seams.
    pub fn new(
        service: Arc<dyn ExtractionService>,
        renderer: Arc<dyn PageRenderer>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            service,
            renderer,
            config,
        }
    }

    /// Build the production extractor: a resolved LLM provider and pdfium.
    ///
    /// # Errors
    /// [`ExtractError::ProviderNotConfigured`] when no provider can be resolved.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, ExtractError> {
        let provider = resolve_provider(&config)?;
        debug!("LLM provider resolved");
        let service = Arc::new(LlmExtractionService::new(provider, &config));
        let renderer = Arc::new(PdfiumRenderer::new(
            config.max_rendered_pixels,
            config.password.clone(),
        ));
        Ok(Self::new(service, renderer, config))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn observer(&self) -> Option<&dyn ExtractionObserver> {
        self.config.observer.as_deref()
    }

    // ── Single document ──────────────────────────────────────────────────

    /// Run one already-loaded document through the pipeline.
    ///
    /// Never fails: filter skips, unreadable PDFs and unit errors all end up
    /// inside the returned [`DocumentResult`].
    pub async fn process_document(&self, document: &Document) -> DocumentResult {
        let start = Instant::now();
        let decision = filter::should_process(&document.id, &self.config.context);
        if !decision.should_process() {
            return self.finish(self.prefilter_skip(&document.id, decision), start);
        }
        debug!("{}: pre-filter passed ({})", document.id, decision);
        let result = self.extract_loaded(document).await;
        self.finish(result, start)
    }

    /// Run a PDF held in memory through the pipeline. `name` is used as the
    /// document identifier.
    pub async fn process_bytes(&self, name: impl Into<PathBuf>, bytes: Vec<u8>) -> DocumentResult {
        self.process_document(&Document::from_bytes(name, bytes)).await
    }

    /// Pre-filter a path, then load and process it. The file is not read
    /// when the pre-filter rejects its name.
    pub async fn process_path(&self, path: &Path) -> DocumentResult {
        let start = Instant::now();
        let id = document_id(path);
        let decision = filter::should_process(&id, &self.config.context);
        if !decision.should_process() {
            return self.finish(self.prefilter_skip(&id, decision), start);
        }

        let result = match input::load_document(path).await {
            Ok(document) => self.extract_loaded(&document).await,
            Err(e) => {
                warn!("{}: {}", id, e);
                DocumentResult::failed(id, e.to_string(), self.base_metadata(None))
            }
        };
        self.finish(result, start)
    }

    fn prefilter_skip(&self, id: &str, decision: PreFilterDecision) -> DocumentResult {
        info!("{}: skipped by pre-filter: {}", id, decision);
        let year = match &decision {
            PreFilterDecision::YearMismatch { year, .. } => Some(year.clone()),
            _ => filter::detect_year(id),
        };
        DocumentResult::skipped(id, decision.to_string(), self.base_metadata(year))
    }

    fn base_metadata(&self, detected_year: Option<String>) -> DocumentMetadata {
        let context = &self.config.context;
        let exam = (!context.full_name.is_empty() || !context.exam_key.is_empty())
            .then(|| context.display_name());
        DocumentMetadata {
            detected_year,
            exam,
            ..Default::default()
        }
    }

    async fn extract_loaded(&self, document: &Document) -> DocumentResult {
        let mut metadata = self.base_metadata(document.detected_year.clone());

        let pages = match self.renderer.render_pages(document).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!("{}: {}", document.id, e);
                return DocumentResult::failed(&document.id, e.to_string(), metadata);
            }
        };
        metadata.total_pages = pages.len();

        let units = match segment(&document.id, pages, self.config.pages_per_chunk) {
            Ok(units) => units,
            Err(e) => {
                warn!("{}: {}", document.id, e);
                return DocumentResult::failed(&document.id, e.to_string(), metadata);
            }
        };

        info!(
            "{}: {} pages in {} units, {} concurrent",
            document.id,
            metadata.total_pages,
            units.len(),
            self.config.unit_concurrency
        );
        if let Some(obs) = self.observer() {
            obs.on_document_start(&document.id, units.len());
        }

        let stem = document.stem();
        let scope = UnitScope {
            document: &document.id,
            stem: &stem,
            total_pages: metadata.total_pages,
        };
        let reports = self.run_units(&units, scope).await;

        reconcile(
            &document.id,
            reports,
            metadata,
            ReconcileOptions {
                strict: self.config.context.strict_filtering,
                dedup_prefix_chars: self.config.dedup_prefix_chars,
            },
        )
    }

    async fn run_units(&self, units: &[Unit], scope: UnitScope<'_>) -> Vec<UnitReport> {
        let call_delay = Duration::from_millis(self.config.call_delay_ms);

        // Dispatch by index: a `&Unit` closure argument makes the document
        // future non-`Send`, which `extract_stream` needs.
        let results = run_bounded(0..units.len(), self.config.unit_concurrency, |i, index| async move {
            if index > 0 && !call_delay.is_zero() {
                sleep(call_delay).await;
            }
            let report = process_unit(self.service.as_ref(), &units[i], scope, &self.config).await;
            self.notify_unit(scope.document, &report);
            Ok::<_, Infallible>(report)
        })
        .await;

        results
            .into_iter()
            .zip(units)
            .map(|(result, unit)| match result {
                Ok(report) => report,
                Err(TaskFailure::Failed(never)) => match never {},
                Err(TaskFailure::Panicked(msg)) => {
                    warn!("{} pages {}: unit panicked: {}", scope.document, unit.range, msg);
                    let report = UnitReport::panicked(unit.index, unit.range, msg);
                    self.notify_unit(scope.document, &report);
                    report
                }
            })
            .collect()
    }

    fn notify_unit(&self, document: &str, report: &UnitReport) {
        let Some(obs) = self.observer() else { return };
        match &report.outcome {
            UnitOutcome::Items(qs) => obs.on_unit_complete(document, report.range, qs.len()),
            UnitOutcome::UnitSkip(reason) | UnitOutcome::DocumentSkip(reason) => {
                obs.on_unit_skipped(document, report.range, reason)
            }
            UnitOutcome::Error(e) => obs.on_unit_error(document, report.range, &e.to_string()),
        }
    }

    fn finish(&self, mut result: DocumentResult, start: Instant) -> DocumentResult {
        result.metadata.duration_ms = start.elapsed().as_millis() as u64;
        result.metadata.processed_at = chrono::Utc::now().to_rfc3339();

        if result.is_skipped() {
            debug!("{}: skipped in {}ms", result.document, result.metadata.duration_ms);
        } else {
            info!(
                "{}: {} questions, {} errors, {}ms",
                result.document,
                result.questions.len(),
                result.errors.len(),
                result.metadata.duration_ms
            );
        }
        if let Some(obs) = self.observer() {
            obs.on_document_complete(&result);
        }
        result
    }

    // ── Batches ──────────────────────────────────────────────────────────

    /// Process a list of PDF paths with `document_concurrency` in flight.
    pub async fn process_batch(&self, paths: Vec<PathBuf>) -> BatchResult {
        let start = Instant::now();
        let ids: Vec<String> = paths.iter().map(|p| document_id(p)).collect();

        let estimate = filter::estimate(ids.iter().map(String::as_str), &self.config.context);
        info!(
            "Pre-filter estimate: {} of {} documents would be processed, {} skipped",
            estimate.would_process,
            ids.len(),
            estimate.would_skip
        );
        if let Some(obs) = self.observer() {
            obs.on_batch_start(paths.len());
        }

        let document_delay = Duration::from_millis(self.config.document_delay_ms);
        let results = run_bounded(paths, self.config.document_concurrency, |path, index| async move {
            if index > 0 && !document_delay.is_zero() {
                sleep(document_delay).await;
            }
            Ok::<_, Infallible>(self.process_path(&path).await)
        })
        .await;

        let documents: Vec<DocumentResult> = results
            .into_iter()
            .zip(ids)
            .map(|(result, id)| match result {
                Ok(doc) => doc,
                Err(TaskFailure::Failed(never)) => match never {},
                Err(TaskFailure::Panicked(msg)) => {
                    warn!("{}: document processing panicked: {}", id, msg);
                    let doc = DocumentResult::failed(id, format!("panicked: {msg}"), DocumentMetadata::default());
                    if let Some(obs) = self.observer() {
                        obs.on_document_complete(&doc);
                    }
                    doc
                }
            })
            .collect();

        let batch = BatchResult::from_documents(documents, start.elapsed().as_millis() as u64);
        info!(
            "Batch complete: {} found, {} processed, {} skipped, {} succeeded, {} failed, {} questions in {}ms",
            batch.files_found,
            batch.processed,
            batch.skipped,
            batch.succeeded,
            batch.failed,
            batch.total_questions,
            batch.duration_ms
        );
        if let Some(obs) = self.observer() {
            obs.on_batch_complete(&batch);
        }
        batch
    }

    /// Enumerate every PDF under `root` and process them as one batch.
    ///
    /// # Errors
    /// Only enumeration failures; per-document problems stay in the result.
    pub async fn process_directory(&self, root: impl AsRef<Path>) -> Result<BatchResult, ExtractError> {
        let paths = input::enumerate_documents(root.as_ref())?;
        Ok(self.process_batch(paths).await)
    }
}

// ── Convenience entry points ─────────────────────────────────────────────

/// Extract every PDF under `root` and write all artifacts to `out_dir`.
///
/// This is the primary entry point for the library.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2quiz::{extract_directory, ExtractionConfig, ExtractionContext};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let context = ExtractionContext::from_json(r#"{"exam_key": "neet", "allowed_years": ["2023"]}"#)?;
/// let config = ExtractionConfig::builder().context(context).build()?;
/// let batch = extract_directory("papers/", "out/", config).await?;
/// println!("{} questions from {} documents", batch.total_questions, batch.processed);
/// # Ok(())
/// # }
/// ```
pub async fn extract_directory(
    root: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    config: ExtractionConfig,
) -> Result<BatchResult, ExtractError> {
    let extractor = Extractor::from_config(config)?;
    let batch = extractor.process_directory(root).await?;
    report::write_batch(out_dir.as_ref(), &batch).await?;
    Ok(batch)
}

/// Synchronous wrapper around [`extract_directory`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_directory_sync(
    root: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    config: ExtractionConfig,
) -> Result<BatchResult, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_directory(root, out_dir, config))
}

/// Pre-filter verdict for one document, computed without any model call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedDocument {
    pub path: PathBuf,
    pub document: String,
    pub detected_year: Option<String>,
    pub process: bool,
    pub reason: String,
}

/// Enumerate `root` and apply the pre-filter to every identifier.
///
/// Does not require an LLM provider or API key.
pub fn plan_directory(
    root: impl AsRef<Path>,
    context: &ExtractionContext,
) -> Result<Vec<PlannedDocument>, ExtractError> {
    let paths = input::enumerate_documents(root.as_ref())?;
    Ok(paths
        .into_iter()
        .map(|path| {
            let document = document_id(&path);
            let decision = filter::should_process(&document, context);
            PlannedDocument {
                detected_year: filter::detect_year(&document),
                process: decision.should_process(),
                reason: decision.to_string(),
                document,
                path,
            }
        })
        .collect())
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    honoured only when both are set.
/// 4. **Auto-detection**: OpenAI when `OPENAI_API_KEY` is set, otherwise
///    whatever [`ProviderFactory::from_env`] finds first.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
