//! Pipeline integration tests with in-process fakes for both seams.
//!
//! The renderer fabricates one image per page (tagged with the document id)
//! and the service answers from a script keyed by `(document, first page)`,
//! so these tests need neither pdfium nor an API key.

use async_trait::async_trait;
use edgequake_llm::ImageData;
use edgequake_pdf2quiz::pipeline::reconcile::STRICT_EMPTY_REASON;
use edgequake_pdf2quiz::report::{write_batch, BATCH_SUMMARY_FILE};
use edgequake_pdf2quiz::{
    extract_directory_stream, extract_stream, BatchResult, Document, DocumentResult, ExtractError,
    ExtractionConfig, ExtractionContext, ExtractionObserver, ExtractionService, Extractor, PageRange,
    PageRenderer, ServiceError, ServiceReply, Unit,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ── Fakes ────────────────────────────────────────────────────────────────────

struct FakeRenderer {
    pages: HashMap<String, usize>,
    calls: AtomicUsize,
}

impl FakeRenderer {
    fn new(docs: &[(&str, usize)]) -> Arc<Self> {
        Arc::new(Self {
            pages: docs.iter().map(|(id, n)| (id.to_string(), *n)).collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render_pages(&self, document: &Document) -> Result<Vec<ImageData>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = self
            .pages
            .get(&document.id)
            .copied()
            .ok_or_else(|| ExtractError::CorruptPdf {
                document: document.id.clone(),
                detail: "unknown test document".into(),
            })?;
        Ok((1..=n)
            .map(|p| ImageData::new(format!("{}#{p}", document.id), "image/png"))
            .collect())
    }
}

/// Replies by `(document, unit first page)`; unscripted units get `[]`.
struct ScriptedService {
    replies: HashMap<(String, usize), String>,
    calls: AtomicUsize,
}

impl ScriptedService {
    fn new(replies: Vec<(&str, usize, String)>) -> Arc<Self> {
        Arc::new(Self {
            replies: replies
                .into_iter()
                .map(|(doc, from, text)| ((doc.to_string(), from), text))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ExtractionService for ScriptedService {
    async fn submit(&self, _system: &str, instructions: &str, unit: &Unit) -> Result<ServiceReply, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(instructions.contains(&format!(
            "pages {} to {}",
            unit.range.from_page, unit.range.to_page
        )));
        let doc = unit.pages[0]
            .data
            .split('#')
            .next()
            .unwrap_or_default()
            .to_string();
        let content = self
            .replies
            .get(&(doc, unit.range.from_page))
            .cloned()
            .unwrap_or_else(|| "[]".to_string());
        Ok(ServiceReply {
            content,
            input_tokens: 1000,
            output_tokens: 200,
        })
    }
}

#[derive(Default)]
struct Counting {
    documents_started: AtomicUsize,
    units_complete: AtomicUsize,
    units_skipped: AtomicUsize,
    units_failed: AtomicUsize,
    documents_complete: AtomicUsize,
    batches_complete: AtomicUsize,
}

impl ExtractionObserver for Counting {
    fn on_document_start(&self, _document: &str, _units: usize) {
        self.documents_started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_unit_complete(&self, _document: &str, _range: PageRange, _questions: usize) {
        self.units_complete.fetch_add(1, Ordering::SeqCst);
    }
    fn on_unit_skipped(&self, _document: &str, _range: PageRange, _reason: &str) {
        self.units_skipped.fetch_add(1, Ordering::SeqCst);
    }
    fn on_unit_error(&self, _document: &str, _range: PageRange, _error: &str) {
        self.units_failed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_complete(&self, _result: &DocumentResult) {
        self.documents_complete.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _batch: &BatchResult) {
        self.batches_complete.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn item(text: &str, page: usize) -> String {
    format!(
        r#"{{"text": "{text}", "options": ["A. 1", "B. 2", "C. 3", "D. 4"], "answer": "B", "subject": "Physics", "difficulty": "medium", "pageNumber": {page}}}"#
    )
}

fn items(list: &[(&str, usize)]) -> String {
    let body: Vec<String> = list.iter().map(|(t, p)| item(t, *p)).collect();
    format!("```json\n[{}]\n```", body.join(", "))
}

fn config(context: ExtractionContext) -> ExtractionConfig {
    ExtractionConfig::builder()
        .context(context)
        .pages_per_chunk(8)
        .max_retries_per_chunk(1)
        .retry_delay_ms(1)
        .call_delay_ms(0)
        .document_delay_ms(0)
        .unit_concurrency(3)
        .document_concurrency(2)
        .build()
        .unwrap()
}

const FAKE_PDF: &[u8] = b"%PDF-1.4\n%fake\n";

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn twenty_page_paper_with_answer_key_and_duplicate() {
    let renderer = FakeRenderer::new(&[("jee_main_2024.pdf", 20)]);
    let service = ScriptedService::new(vec![
        (
            "jee_main_2024.pdf",
            1,
            items(&[
                ("A block slides down a rough incline.", 1),
                ("Find the current through the 4 ohm resistor.", 2),
                ("The dimension of Planck's constant is", 3),
                ("A projectile is fired at 45 degrees.", 4),
                ("Two charges are separated by 1 m.", 8),
            ]),
        ),
        (
            "jee_main_2024.pdf",
            9,
            r#"{"skip": true, "scope": "chunk", "reason": "answer key section"}"#.to_string(),
        ),
        (
            "jee_main_2024.pdf",
            17,
            items(&[
                ("Which of the following is a vector?", 1),
                ("The half-life of a sample is 10 days.", 2),
                // Model reported the absolute page for a question it saw again.
                ("Two  charges are separated by 1 m.", 8),
            ]),
        ),
    ]);
    let observer = Arc::new(Counting::default());
    let mut cfg = config(ExtractionContext::default());
    cfg.observer = Some(observer.clone());

    let extractor = Extractor::new(service.clone(), renderer, cfg);
    let result = extractor
        .process_bytes("jee_main_2024.pdf", FAKE_PDF.to_vec())
        .await;

    assert!(result.success, "{:?}", result.errors);
    assert!(result.errors.is_empty());
    assert_eq!(result.questions.len(), 7);
    assert_eq!(
        result.metadata.skip_notes,
        vec!["pages 9-16: answer key section".to_string()]
    );
    assert_eq!(result.metadata.total_pages, 20);
    assert_eq!(result.metadata.units, 3);
    assert_eq!(result.metadata.input_tokens, 3000);
    assert_eq!(result.metadata.output_tokens, 600);
    assert_eq!(result.metadata.detected_year.as_deref(), Some("2024"));
    assert!(!result.metadata.processed_at.is_empty());

    let pages: Vec<usize> = result.questions.iter().map(|q| q.provenance.page).collect();
    assert_eq!(pages, vec![1, 2, 3, 4, 8, 17, 18]);
    assert!(result
        .questions
        .iter()
        .all(|q| q.provenance.source_document == "jee_main_2024.pdf"));

    let mut ids: Vec<&str> = result.questions.iter().map(|q| q.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 7);

    assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    assert_eq!(observer.documents_started.load(Ordering::SeqCst), 1);
    assert_eq!(observer.units_complete.load(Ordering::SeqCst), 2);
    assert_eq!(observer.units_skipped.load(Ordering::SeqCst), 1);
    assert_eq!(observer.units_failed.load(Ordering::SeqCst), 0);
    assert_eq!(observer.documents_complete.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn document_skip_in_second_unit_discards_everything() {
    let renderer = FakeRenderer::new(&[("jee_2023_shift1.pdf", 32)]);
    let service = ScriptedService::new(vec![
        ("jee_2023_shift1.pdf", 1, items(&[("Q one", 1), ("Q two", 2)])),
        (
            "jee_2023_shift1.pdf",
            9,
            r#"{"skip": true, "scope": "document", "reason": "paper is NEET 2023, not JEE"}"#.to_string(),
        ),
        ("jee_2023_shift1.pdf", 17, items(&[("Q three", 1)])),
        ("jee_2023_shift1.pdf", 25, items(&[("Q four", 1)])),
    ]);
    let extractor = Extractor::new(service, renderer, config(ExtractionContext::default()));

    let result = extractor
        .process_bytes("jee_2023_shift1.pdf", FAKE_PDF.to_vec())
        .await;

    assert!(result.is_skipped());
    assert!(!result.success);
    assert!(result.questions.is_empty());
    assert_eq!(
        result.metadata.skipped_reason.as_deref(),
        Some("paper is NEET 2023, not JEE")
    );
}

#[tokio::test]
async fn strict_document_with_nothing_extracted_is_skipped() {
    let renderer = FakeRenderer::new(&[("jee_2024.pdf", 10)]);
    let service = ScriptedService::new(vec![
        (
            "jee_2024.pdf",
            1,
            r#"{"skip": true, "scope": "chunk", "reason": "instructions only"}"#.to_string(),
        ),
        (
            "jee_2024.pdf",
            9,
            r#"{"skip": true, "scope": "chunk", "reason": "rough work"}"#.to_string(),
        ),
    ]);
    let context = ExtractionContext::default().strict(true);
    let extractor = Extractor::new(service, renderer, config(context));

    let result = extractor.process_bytes("jee_2024.pdf", FAKE_PDF.to_vec()).await;

    assert!(result.is_skipped());
    assert_eq!(result.metadata.skipped_reason.as_deref(), Some(STRICT_EMPTY_REASON));
    assert_eq!(result.metadata.skip_notes.len(), 2);
}

#[tokio::test]
async fn unparseable_replies_fail_the_document_with_unit_errors() {
    let renderer = FakeRenderer::new(&[("neet_2022.pdf", 12)]);
    let service = ScriptedService::new(vec![
        ("neet_2022.pdf", 1, "Sorry, I can't read these pages.".to_string()),
        ("neet_2022.pdf", 9, "Still nothing useful here.".to_string()),
    ]);
    let extractor = Extractor::new(service.clone(), renderer, config(ExtractionContext::default()));

    let result = extractor.process_bytes("neet_2022.pdf", FAKE_PDF.to_vec()).await;

    assert!(!result.success);
    assert!(!result.is_skipped());
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors[0].starts_with("pages 1-8:"), "{}", result.errors[0]);
    assert!(result.errors[1].starts_with("pages 9-12:"), "{}", result.errors[1]);
    // One initial attempt plus one retry per unit.
    assert_eq!(service.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn batch_prefilter_never_touches_rejected_files() {
    let input = tempfile::tempdir().unwrap();
    let nested = input.path().join("2023");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::write(nested.join("jee_2023.pdf"), FAKE_PDF).unwrap();
    std::fs::write(input.path().join("jee_2019.pdf"), FAKE_PDF).unwrap();
    std::fs::write(input.path().join("jee_mock_paper.pdf"), FAKE_PDF).unwrap();
    std::fs::write(input.path().join("notes.txt"), b"not a paper").unwrap();

    let renderer = FakeRenderer::new(&[("jee_2023.pdf", 4)]);
    let service = ScriptedService::new(vec![(
        "jee_2023.pdf",
        1,
        items(&[("Q one", 1), ("Q two", 3)]),
    )]);
    let context = ExtractionContext::default()
        .with_allowed_years(["2023"])
        .unwrap()
        .strict(true);
    let observer = Arc::new(Counting::default());
    let mut cfg = config(context);
    cfg.observer = Some(observer.clone());
    let extractor = Extractor::new(service.clone(), renderer.clone(), cfg);

    let batch = extractor.process_directory(input.path()).await.unwrap();

    assert_eq!(batch.files_found, 3);
    assert_eq!(batch.skipped, 2);
    assert_eq!(batch.processed, 1);
    assert_eq!(batch.succeeded, 1);
    assert_eq!(batch.total_questions, 2);
    assert!(batch.success());
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    assert_eq!(observer.documents_complete.load(Ordering::SeqCst), 3);
    assert_eq!(observer.batches_complete.load(Ordering::SeqCst), 1);

    let reasons: Vec<(&str, &str)> = batch
        .documents
        .iter()
        .filter_map(|d| Some((d.document.as_str(), d.metadata.skipped_reason.as_deref()?)))
        .collect();
    assert!(reasons
        .iter()
        .any(|(doc, reason)| *doc == "jee_2019.pdf" && reason.starts_with("year mismatch")));
    assert!(reasons
        .iter()
        .any(|(doc, reason)| *doc == "jee_mock_paper.pdf" && reason.contains("strict")));

    let out = tempfile::tempdir().unwrap();
    write_batch(out.path(), &batch).await.unwrap();
    assert!(out.path().join("jee_2023.questions.json").exists());
    assert!(out.path().join("jee_2023.summary.txt").exists());
    assert!(!out.path().join("jee_2019.questions.json").exists());
    assert!(out.path().join(BATCH_SUMMARY_FILE).exists());
}

#[tokio::test]
async fn batch_with_no_success_reports_failure() {
    let input = tempfile::tempdir().unwrap();
    std::fs::write(input.path().join("broken_2024.pdf"), b"<html>not a pdf</html>").unwrap();

    let renderer = FakeRenderer::new(&[]);
    let service = ScriptedService::new(vec![]);
    let extractor = Extractor::new(service.clone(), renderer, config(ExtractionContext::default()));

    let batch = extractor.process_directory(input.path()).await.unwrap();

    assert_eq!(batch.failed, 1);
    assert!(!batch.success());
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    assert!(batch.errors[0].starts_with("broken_2024.pdf: "));
}

#[tokio::test]
async fn missing_directory_is_an_error() {
    let extractor = Extractor::new(
        ScriptedService::new(vec![]),
        FakeRenderer::new(&[]),
        config(ExtractionContext::default()),
    );
    let err = extractor
        .process_directory("/definitely/not/here")
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::InputNotFound { .. }));
}

#[tokio::test]
async fn stream_yields_every_document_once() {
    let input = tempfile::tempdir().unwrap();
    for name in ["neet_2022.pdf", "neet_2023.pdf", "neet_2016.pdf"] {
        std::fs::write(input.path().join(name), FAKE_PDF).unwrap();
    }
    let renderer = FakeRenderer::new(&[("neet_2022.pdf", 9), ("neet_2023.pdf", 3)]);
    let service = ScriptedService::new(vec![
        ("neet_2022.pdf", 1, items(&[("Q one", 1)])),
        ("neet_2022.pdf", 9, items(&[("Q two", 1)])),
        ("neet_2023.pdf", 1, items(&[("Q three", 2)])),
    ]);
    let context = ExtractionContext::default()
        .with_allowed_years(["2022", "2023"])
        .unwrap();
    let extractor = Arc::new(Extractor::new(service.clone(), renderer, config(context)));

    let mut results: Vec<DocumentResult> = extract_directory_stream(extractor, input.path())
        .unwrap()
        .collect()
        .await;
    results.sort_by(|a, b| a.document.cmp(&b.document));

    let summary: Vec<(&str, bool, usize)> = results
        .iter()
        .map(|r| (r.document.as_str(), r.is_skipped(), r.questions.len()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("neet_2016.pdf", true, 0),
            ("neet_2022.pdf", false, 2),
            ("neet_2023.pdf", false, 1),
        ]
    );
    assert_eq!(service.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn stream_waits_between_documents() {
    let input = tempfile::tempdir().unwrap();
    let mut paths = Vec::new();
    for name in ["a_2024.pdf", "b_2024.pdf", "c_2024.pdf"] {
        let path = input.path().join(name);
        std::fs::write(&path, FAKE_PDF).unwrap();
        paths.push(path);
    }
    let renderer = FakeRenderer::new(&[("a_2024.pdf", 1), ("b_2024.pdf", 1), ("c_2024.pdf", 1)]);
    let service = ScriptedService::new(vec![]);
    let mut cfg = config(ExtractionContext::default());
    cfg.document_delay_ms = 40;
    cfg.document_concurrency = 3;
    let extractor = Arc::new(Extractor::new(service, renderer, cfg));

    let start = Instant::now();
    let results: Vec<DocumentResult> = extract_stream(extractor, paths).collect().await;

    assert_eq!(results.len(), 3);
    assert!(start.elapsed() >= Duration::from_millis(40));
}
