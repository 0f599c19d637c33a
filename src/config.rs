//! Configuration types for exam-question extraction.
//!
//! Two structs split the knobs by who owns them:
//!
//! * [`ExtractionContext`]: *what* to extract: the target exam, its allowed
//!   years and the strict-filtering flag. Usually loaded from a JSON file.
//! * [`ExtractionConfig`]: *how* to run: chunk size, retries, concurrency
//!   at both layers, model and rendering settings. Built via
//!   [`ExtractionConfigBuilder`].

use crate::error::ExtractError;
use crate::pipeline::filter::normalize_year;
use crate::progress::ProgressObserver;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

// ── Category key ─────────────────────────────────────────────────────────

/// The exam key as it appears in context files: one string or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExamKeyInput {
    One(String),
    Many(Vec<String>),
}

/// Canonical exam key: a set of lower-case alphanumeric tokens.
///
/// An identifier matches when it contains *every* token (AND semantics).
/// An empty key matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ExamKeyInput", into = "Vec<String>")]
pub struct CategoryKey {
    tokens: BTreeSet<String>,
}

impl CategoryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = parts.into_iter().flat_map(|p| tokenize(p.as_ref())).collect();
        Self { tokens }
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// True when every token occurs in the identifier's own token set.
    pub fn matches(&self, identifier: &str) -> bool {
        let haystack: BTreeSet<String> = tokenize(identifier).into_iter().collect();
        self.tokens.iter().all(|t| haystack.contains(t))
    }
}

impl From<ExamKeyInput> for CategoryKey {
    fn from(input: ExamKeyInput) -> Self {
        match input {
            ExamKeyInput::One(s) => CategoryKey::new([s]),
            ExamKeyInput::Many(v) => CategoryKey::new(v),
        }
    }
}

impl From<CategoryKey> for Vec<String> {
    fn from(key: CategoryKey) -> Self {
        key.tokens.into_iter().collect()
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.tokens().collect();
        f.write_str(&joined.join("+"))
    }
}

fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

// ── Allowed years ────────────────────────────────────────────────────────

/// A year as written in a context file: `2023`, `"2023"` or `"'23"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum YearInput {
    Number(u64),
    Text(String),
}

impl From<YearInput> for String {
    fn from(input: YearInput) -> Self {
        match input {
            YearInput::Number(n) => n.to_string(),
            YearInput::Text(s) => s,
        }
    }
}

/// Accept years as numbers or strings; normalisation happens in
/// [`ExtractionContext::from_json`].
fn deserialize_years<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<YearInput>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(String::from).collect())
}

// ── Extraction context ───────────────────────────────────────────────────

/// Target exam and filtering policy.
///
/// `full_name` and `subjects` are only ever interpolated into the prompt;
/// `allowed_years`, `strict_filtering` and `category_gate` drive control flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionContext {
    #[serde(default)]
    pub exam_key: CategoryKey,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Normalised 4-digit years. Empty means "any year".
    #[serde(default, deserialize_with = "deserialize_years")]
    pub allowed_years: BTreeSet<String>,
    /// Treat "no year detected" as out of scope.
    #[serde(default)]
    pub strict_filtering: bool,
    /// Skip identifiers that do not contain every exam-key token.
    #[serde(default)]
    pub category_gate: bool,
}

impl ExtractionContext {
    pub fn new(full_name: impl Into<String>, exam_key: CategoryKey) -> Self {
        Self {
            exam_key,
            full_name: full_name.into(),
            ..Default::default()
        }
    }

    /// Normalise and set the allowed years (`"23"` → `"2023"`).
    pub fn with_allowed_years<I, S>(mut self, years: I) -> Result<Self, ExtractError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_years = years
            .into_iter()
            .map(|y| {
                normalize_year(y.as_ref()).ok_or_else(|| {
                    ExtractError::InvalidContext(format!("'{}' is not a year", y.as_ref()))
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn with_subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subjects = subjects.into_iter().map(Into::into).collect();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_filtering = strict;
        self
    }

    pub fn category_gate(mut self, gate: bool) -> Self {
        self.category_gate = gate;
        self
    }

    /// Parse a context from JSON, normalising years at ingestion.
    pub fn from_json(json: &str) -> Result<Self, ExtractError> {
        let raw: ExtractionContext =
            serde_json::from_str(json).map_err(|e| ExtractError::InvalidContext(e.to_string()))?;
        let years = raw.allowed_years.clone();
        raw.with_allowed_years(years)
    }

    /// Human-readable name used in prompts and logs.
    pub fn display_name(&self) -> String {
        if !self.full_name.is_empty() {
            self.full_name.clone()
        } else if !self.exam_key.is_empty() {
            self.exam_key.to_string()
        } else {
            "the target exam".to_string()
        }
    }
}

// ── Extraction config ────────────────────────────────────────────────────

/// Configuration for an extraction run.
///
/// # Example
/// ```rust
/// use edgequake_pdf2quiz::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .pages_per_chunk(8)
///     .unit_concurrency(6)
///     .document_concurrency(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// What to extract and how to filter.
    pub context: ExtractionContext,

    /// Maximum pages per unit sent in one call. Default: 8.
    pub pages_per_chunk: usize,

    /// Additional attempts per unit after the first. Default: 3.
    pub max_retries_per_chunk: u32,

    /// Base retry delay; retry `n` waits `n * retry_delay_ms`. Default: 2000.
    pub retry_delay_ms: u64,

    /// Pause before each unit call after the first in a document. Default: 500.
    pub call_delay_ms: u64,

    /// Pause before each document after the first in a batch. Default: 1000.
    pub document_delay_ms: u64,

    /// Concurrent unit calls within one document. Default: 4.
    pub unit_concurrency: usize,

    /// Concurrent documents within a batch. Default: 2.
    pub document_concurrency: usize,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Characters of question text used in the dedup key. Default: 120.
    pub dedup_prefix_chars: usize,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per unit. Default: 8192.
    pub max_tokens: usize,

    /// Longest rendered page edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Receives per-document and per-unit events.
    pub observer: Option<ProgressObserver>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            context: ExtractionContext::default(),
            pages_per_chunk: 8,
            max_retries_per_chunk: 3,
            retry_delay_ms: 2000,
            call_delay_ms: 500,
            document_delay_ms: 1000,
            unit_concurrency: 4,
            document_concurrency: 2,
            api_timeout_secs: 120,
            dedup_prefix_chars: 120,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_rendered_pixels: 2000,
            password: None,
            system_prompt: None,
            observer: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("context", &self.context)
            .field("pages_per_chunk", &self.pages_per_chunk)
            .field("max_retries_per_chunk", &self.max_retries_per_chunk)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("call_delay_ms", &self.call_delay_ms)
            .field("document_delay_ms", &self.document_delay_ms)
            .field("unit_concurrency", &self.unit_concurrency)
            .field("document_concurrency", &self.document_concurrency)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("observer", &self.observer.as_ref().map(|_| "<dyn ExtractionObserver>"))
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn context(mut self, context: ExtractionContext) -> Self {
        self.config.context = context;
        self
    }

    pub fn pages_per_chunk(mut self, n: usize) -> Self {
        self.config.pages_per_chunk = n.max(1);
        self
    }

    pub fn max_retries_per_chunk(mut self, n: u32) -> Self {
        self.config.max_retries_per_chunk = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn call_delay_ms(mut self, ms: u64) -> Self {
        self.config.call_delay_ms = ms;
        self
    }

    pub fn document_delay_ms(mut self, ms: u64) -> Self {
        self.config.document_delay_ms = ms;
        self
    }

    pub fn unit_concurrency(mut self, n: usize) -> Self {
        self.config.unit_concurrency = n.max(1);
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn dedup_prefix_chars(mut self, n: usize) -> Self {
        self.config.dedup_prefix_chars = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn observer(mut self, observer: ProgressObserver) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.pages_per_chunk == 0 {
            return Err(ExtractError::InvalidConfig(
                "pages_per_chunk must be ≥ 1".into(),
            ));
        }
        if c.unit_concurrency == 0 || c.document_concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "Concurrency must be ≥ 1 at both layers".into(),
            ));
        }
        if c.dedup_prefix_chars == 0 {
            return Err(ExtractError::InvalidConfig(
                "dedup_prefix_chars must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
