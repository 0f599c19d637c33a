//! VLM interaction: the extraction service boundary and the unit processor.
//!
//! [`ExtractionService`] is the only seam with network I/O. The production
//! implementation, [`LlmExtractionService`], sends the system prompt plus one
//! user message carrying the unit instructions and every page image of the
//! unit. Tests swap in a scripted service.
//!
//! [`process_unit`] drives one unit through its state machine:
//!
//! ```text
//! instructions ──▶ submit ──▶ parse ──▶ Skip(document) ─▶ DocumentSkip
//!                    ▲          │     ├▶ Skip(chunk) ────▶ UnitSkip
//!                    │ retry    │     └▶ Items ──────────▶ Items (normalised)
//!                    └──────────┘ transport / timeout / parse failure
//!                                 exhausted ─────────────▶ Error
//! ```
//!
//! ## Retry Strategy
//!
//! Transport failures, timeouts and unusable responses share one linear
//! backoff policy: retry `n` waits `n * retry_delay_ms`. Authentication
//! failures are returned immediately; retrying a bad key only burns time.

use crate::config::ExtractionConfig;
use crate::error::UnitError;
use crate::output::Question;
use crate::pipeline::postprocess::{normalize_items, ItemOrigin};
use crate::pipeline::response::{parse_response, ModelResponse, ResponseError, SkipScope};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::segment::{PageRange, Unit};
use crate::prompts::{unit_instructions, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::Duration;
use tracing::debug;

// ── Service boundary ─────────────────────────────────────────────────────────

/// Raw text returned by the service for one unit, plus token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Why a service call produced no reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Transport(String),
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
    /// Rejected credentials. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),
}

/// "Submit a unit plus instructions, receive text."
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn submit(
        &self,
        system_prompt: &str,
        instructions: &str,
        unit: &Unit,
    ) -> Result<ServiceReply, ServiceError>;
}

/// [`ExtractionService`] backed by an `edgequake_llm` provider.
pub struct LlmExtractionService {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Duration,
}

impl LlmExtractionService {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

impl fmt::Debug for LlmExtractionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmExtractionService")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ExtractionService for LlmExtractionService {
    async fn submit(
        &self,
        system_prompt: &str,
        instructions: &str,
        unit: &Unit,
    ) -> Result<ServiceReply, ServiceError> {
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images(instructions, unit.pages.clone()),
        ];

        let call = self.provider.chat(&messages, Some(&self.options));
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(ServiceError::Timeout {
                secs: self.timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(classify_provider_error(e.to_string())),
            Ok(Ok(response)) => Ok(ServiceReply {
                content: response.content,
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
            }),
        }
    }
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn classify_provider_error(detail: String) -> ServiceError {
    let lower = detail.to_ascii_lowercase();
    let auth = ["401", "403", "unauthorized", "invalid api key", "incorrect api key", "authentication"]
        .iter()
        .any(|needle| lower.contains(needle));
    if auth {
        ServiceError::Auth(detail)
    } else {
        ServiceError::Transport(detail)
    }
}

// ── Unit processor ───────────────────────────────────────────────────────────

/// Terminal state of one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Items(Vec<Question>),
    UnitSkip(String),
    DocumentSkip(String),
    Error(UnitError),
}

/// A unit's outcome plus the bookkeeping the reconciler and reports need.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport {
    pub index: usize,
    pub range: PageRange,
    pub outcome: UnitOutcome,
    pub retries: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

impl UnitReport {
    /// Report for a unit whose processing never returned.
    pub fn panicked(index: usize, range: PageRange, message: String) -> Self {
        Self {
            index,
            range,
            outcome: UnitOutcome::Error(UnitError::Panicked(message)),
            retries: 0,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
        }
    }
}

/// Per-document facts every unit of that document shares.
#[derive(Debug, Clone, Copy)]
pub struct UnitScope<'a> {
    pub document: &'a str,
    pub stem: &'a str,
    pub total_pages: usize,
}

#[derive(Debug)]
enum AttemptError {
    Service(ServiceError),
    Response(ResponseError),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Service(e) => write!(f, "{e}"),
            AttemptError::Response(e) => write!(f, "{e}"),
        }
    }
}

impl AttemptError {
    fn into_unit_error(self, retries: u32) -> UnitError {
        match self {
            AttemptError::Service(ServiceError::Timeout { secs }) => UnitError::Timeout { retries, secs },
            AttemptError::Service(e) => UnitError::Transport {
                retries,
                detail: e.to_string(),
            },
            AttemptError::Response(e) => UnitError::Parse {
                retries,
                detail: e.to_string(),
            },
        }
    }
}

/// Process one unit: call the service, interpret the reply, retry on failure.
///
/// Always returns a [`UnitReport`]; errors are carried in the outcome so one
/// bad unit never aborts its document.
pub async fn process_unit(
    service: &dyn ExtractionService,
    unit: &Unit,
    scope: UnitScope<'_>,
    config: &ExtractionConfig,
) -> UnitReport {
    let start = Instant::now();
    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let instructions = unit_instructions(&config.context, unit.range, scope.total_pages);
    let label = format!("{} pages {}", scope.document, unit.range);

    let input_tokens = AtomicU64::new(0);
    let output_tokens = AtomicU64::new(0);

    let policy = RetryPolicy::linear(
        config.max_retries_per_chunk,
        Duration::from_millis(config.retry_delay_ms),
    );
    let retried = policy
        .run_if(
            &label,
            |e: &AttemptError| !matches!(e, AttemptError::Service(ServiceError::Auth(_))),
            |_attempt| {
                let instructions = instructions.as_str();
                let (input_tokens, output_tokens) = (&input_tokens, &output_tokens);
                async move {
                    let reply = service
                        .submit(system_prompt, instructions, unit)
                        .await
                        .map_err(AttemptError::Service)?;
                    input_tokens.fetch_add(reply.input_tokens, Ordering::Relaxed);
                    output_tokens.fetch_add(reply.output_tokens, Ordering::Relaxed);
                    parse_response(&reply.content).map_err(AttemptError::Response)
                }
            },
        )
        .await;

    let outcome = match retried.result {
        Ok(ModelResponse::Skip(skip)) => match skip.scope {
            SkipScope::Document => UnitOutcome::DocumentSkip(skip.reason),
            SkipScope::Chunk => UnitOutcome::UnitSkip(skip.reason),
        },
        Ok(ModelResponse::Items(values)) => UnitOutcome::Items(normalize_items(
            values,
            ItemOrigin {
                document: scope.document,
                stem: scope.stem,
                unit_index: unit.index,
                range: unit.range,
            },
        )),
        Err(e) => UnitOutcome::Error(e.into_unit_error(retried.retries)),
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    debug!(
        "{}: {} retries, {} input tokens, {} output tokens, {}ms",
        label,
        retried.retries,
        input_tokens.load(Ordering::Relaxed),
        output_tokens.load(Ordering::Relaxed),
        duration_ms
    );

    UnitReport {
        index: unit.index,
        range: unit.range,
        outcome,
        retries: retried.retries,
        input_tokens: input_tokens.into_inner(),
        output_tokens: output_tokens.into_inner(),
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies are handed out in order; the last one repeats.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, ServiceError>>>,
        calls: AtomicU64,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&str, ServiceError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl ExtractionService for Scripted {
        async fn submit(&self, _: &str, instructions: &str, unit: &Unit) -> Result<ServiceReply, ServiceError> {
            assert!(instructions.contains(&format!("pages {} to {}", unit.range.from_page, unit.range.to_page)));
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            let next = if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            };
            next.map(|content| ServiceReply {
                content,
                input_tokens: 100,
                output_tokens: 10,
            })
        }
    }

    fn unit(from: usize, to: usize) -> Unit {
        Unit {
            index: 1,
            range: PageRange::new(from, to),
            pages: Vec::new(),
        }
    }

    fn config(retries: u32) -> ExtractionConfig {
        ExtractionConfig::builder()
            .max_retries_per_chunk(retries)
            .retry_delay_ms(1)
            .build()
            .unwrap()
    }

    const SCOPE: UnitScope<'static> = UnitScope {
        document: "jee_2024.pdf",
        stem: "jee_2024",
        total_pages: 20,
    };

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&ExtractionConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    #[test]
    fn provider_errors_are_classified() {
        assert!(matches!(classify_provider_error("HTTP 401 Unauthorized".into()), ServiceError::Auth(_)));
        assert!(matches!(classify_provider_error("429 rate limited".into()), ServiceError::Transport(_)));
    }

    #[tokio::test]
    async fn items_are_normalised_with_absolute_pages() {
        let service = Scripted::new(vec![Ok(r#"{"questions": [{"text": "Q1", "page": 3}, {"text": "Q2", "page": 14}]}"#)]);
        let report = process_unit(&service, &unit(9, 16), SCOPE, &config(0)).await;
        match report.outcome {
            UnitOutcome::Items(qs) => {
                assert_eq!(qs.len(), 2);
                assert_eq!(qs[0].provenance.page, 11);
                assert_eq!(qs[1].provenance.page, 14);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(report.input_tokens, 100);
    }

    #[tokio::test]
    async fn skip_objects_are_classified() {
        let service = Scripted::new(vec![Ok(r#"{"skip": true, "scope": "chunk", "reason": "answer key section"}"#)]);
        let report = process_unit(&service, &unit(9, 16), SCOPE, &config(0)).await;
        assert_eq!(report.outcome, UnitOutcome::UnitSkip("answer key section".into()));

        let service = Scripted::new(vec![Ok(r#"{"skip": true, "reason": "paper is from year 2017"}"#)]);
        let report = process_unit(&service, &unit(1, 8), SCOPE, &config(0)).await;
        assert!(matches!(report.outcome, UnitOutcome::DocumentSkip(_)));
    }

    #[tokio::test]
    async fn parse_failures_are_retried() {
        let service = Scripted::new(vec![
            Ok("Sorry, I cannot help with that."),
            Err(ServiceError::Transport("503".into())),
            Ok(r#"[{"text": "Q1"}]"#),
        ]);
        let report = process_unit(&service, &unit(1, 8), SCOPE, &config(3)).await;
        assert!(matches!(report.outcome, UnitOutcome::Items(ref qs) if qs.len() == 1));
        assert_eq!(report.retries, 2);
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
        // Tokens from the unusable reply still count.
        assert_eq!(report.input_tokens, 200);
    }

    #[tokio::test]
    async fn exhausted_retries_yield_error() {
        let service = Scripted::new(vec![Err(ServiceError::Timeout { secs: 5 })]);
        let report = process_unit(&service, &unit(1, 8), SCOPE, &config(2)).await;
        assert_eq!(report.outcome, UnitOutcome::Error(UnitError::Timeout { retries: 2, secs: 5 }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let service = Scripted::new(vec![Err(ServiceError::Auth("bad key".into()))]);
        let report = process_unit(&service, &unit(1, 8), SCOPE, &config(3)).await;
        assert!(matches!(report.outcome, UnitOutcome::Error(UnitError::Transport { retries: 0, .. })));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }
}
