//! CLI binary for edgequake-pdf2quiz.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig`, runs a batch and writes the artifacts.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2quiz::pipeline::input::enumerate_documents;
use edgequake_pdf2quiz::report::write_batch;
use edgequake_pdf2quiz::{
    plan_directory, BatchResult, DocumentResult, ExtractionConfig, ExtractionContext, ExtractionObserver,
    Extractor, PageRange, ProgressObserver,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: one bar over documents plus a log line per unit.
/// Units and documents complete out of order, so every line names its
/// document and page range.
struct CliObserver {
    bar: ProgressBar,
    questions: AtomicUsize,
    unit_errors: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            questions: AtomicUsize::new(0),
            unit_errors: AtomicUsize::new(0),
        })
    }
}

impl ExtractionObserver for CliObserver {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} documents  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_documents as u64);
        self.bar.set_prefix("Extracting");
        self.bar.set_message("");
        self.bar.reset_eta();
    }

    fn on_document_start(&self, document: &str, units: usize) {
        self.bar.set_message(format!("{document} ({units} units)"));
    }

    fn on_unit_complete(&self, document: &str, range: PageRange, questions: usize) {
        self.questions.fetch_add(questions, Ordering::Relaxed);
        self.bar.println(format!(
            "  {} {}  pages {:<7}  {}",
            green("✓"),
            document,
            range.to_string(),
            dim(&format!("{questions} questions")),
        ));
    }

    fn on_unit_skipped(&self, document: &str, range: PageRange, reason: &str) {
        self.bar.println(format!(
            "  {} {}  pages {:<7}  {}",
            yellow("↷"),
            document,
            range.to_string(),
            dim(reason),
        ));
    }

    fn on_unit_error(&self, document: &str, range: PageRange, error: &str) {
        self.unit_errors.fetch_add(1, Ordering::Relaxed);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  pages {:<7}  {}",
            red("✗"),
            document,
            range.to_string(),
            red(&msg),
        ));
    }

    fn on_document_complete(&self, result: &DocumentResult) {
        let line = match (&result.metadata.skipped_reason, result.success) {
            (Some(reason), _) => format!("{} {}  {}", yellow("⊘"), result.document, dim(reason)),
            (None, true) => format!(
                "{} {}  {}",
                green("✔"),
                bold(&result.document),
                bold(&format!("{} questions", result.questions.len()))
            ),
            (None, false) => format!(
                "{} {}  {}",
                red("✘"),
                bold(&result.document),
                red(result.errors.first().map(String::as_str).unwrap_or("failed"))
            ),
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _batch: &BatchResult) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every PDF under papers/ into out/
  pdf2quiz papers/ -o out/

  # Only JEE Main papers from 2023 and 2024; papers without a year are skipped
  pdf2quiz papers/ --exam-key "jee main" --full-name "JEE Main" --years 2023,24 --strict

  # Load the exam context from a JSON file
  pdf2quiz papers/ --context neet.json -o out/

  # Show what the file-name pre-filter would do (no API key needed)
  pdf2quiz papers/ --context neet.json --plan-only

  # Smaller units, more parallel calls
  pdf2quiz papers/ --pages-per-chunk 4 --unit-concurrency 8 --document-concurrency 3

CONTEXT FILE:
  {
    "exam_key": ["jee", "main"],          string or list; every token must match
    "full_name": "JEE Main",
    "subjects": ["Physics", "Chemistry", "Mathematics"],
    "allowed_years": ["2023", "24"],       2-digit years become 19xx/20xx (<=30 → 20xx)
    "strict_filtering": true,              no detected year → skip
    "category_gate": false                 skip files whose name lacks the exam key
  }

OUTPUT:
  <stem>.questions.json   ordered, deduplicated questions
  <stem>.stats.json       counts by subject, difficulty, type, topic
  <stem>.summary.txt      human-readable summary
  batch_summary.json      batch counts and per-document errors

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Override log filter (e.g. edgequake_pdf2quiz=debug)

SETUP:
  1. Set API key:     export OPENAI_API_KEY=sk-...
  2. Extract:         pdf2quiz papers/ -o out/

  The pdfium shared library (libpdfium) must be installed where the system
  loader can find it.
"#;

/// Extract structured exam questions from PDF papers using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2quiz",
    version,
    about = "Extract structured exam questions from PDF papers using Vision LLMs",
    long_about = "Walk a directory of exam papers, filter them by exam and year, send their pages \
to a Vision Language Model in bounded page-range units, and write one deduplicated JSON question \
set per paper. Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible \
endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory of PDF papers (searched recursively) or a single PDF.
    input: PathBuf,

    /// Directory for the generated artifacts.
    #[arg(short, long, env = "PDF2QUIZ_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// JSON file with the exam context (exam_key, full_name, subjects, allowed_years, …).
    #[arg(long, env = "PDF2QUIZ_CONTEXT")]
    context: Option<PathBuf>,

    /// Exam key tokens, e.g. "jee main". Overrides the context file.
    #[arg(long, env = "PDF2QUIZ_EXAM_KEY")]
    exam_key: Option<String>,

    /// Full exam name used in the prompt. Overrides the context file.
    #[arg(long, env = "PDF2QUIZ_FULL_NAME")]
    full_name: Option<String>,

    /// Comma-separated allowed years, e.g. 2023,24. Overrides the context file.
    #[arg(long, env = "PDF2QUIZ_YEARS", value_delimiter = ',')]
    years: Vec<String>,

    /// Skip papers whose file name carries no detectable year.
    #[arg(long, env = "PDF2QUIZ_STRICT")]
    strict: bool,

    /// Skip papers whose file name lacks any exam-key token.
    #[arg(long, env = "PDF2QUIZ_CATEGORY_GATE")]
    category_gate: bool,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Pages per unit sent in one call.
    #[arg(long, env = "PDF2QUIZ_PAGES_PER_CHUNK", default_value_t = 8,
          value_parser = clap::value_parser!(u16).range(1..=50))]
    pages_per_chunk: u16,

    /// Retries per unit on transport or parse failure.
    #[arg(long, env = "PDF2QUIZ_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Base retry delay in ms; retry n waits n × this.
    #[arg(long, env = "PDF2QUIZ_RETRY_DELAY_MS", default_value_t = 2000)]
    retry_delay_ms: u64,

    /// Pause before each unit call after the first, in ms.
    #[arg(long, env = "PDF2QUIZ_CALL_DELAY_MS", default_value_t = 500)]
    call_delay_ms: u64,

    /// Pause before each document after the first, in ms.
    #[arg(long, env = "PDF2QUIZ_DOCUMENT_DELAY_MS", default_value_t = 1000)]
    document_delay_ms: u64,

    /// Concurrent unit calls within one document.
    #[arg(long, env = "PDF2QUIZ_UNIT_CONCURRENCY", default_value_t = 4)]
    unit_concurrency: usize,

    /// Concurrent documents.
    #[arg(long, env = "PDF2QUIZ_DOCUMENT_CONCURRENCY", default_value_t = 2)]
    document_concurrency: usize,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF2QUIZ_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Max LLM output tokens per unit.
    #[arg(long, env = "PDF2QUIZ_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2QUIZ_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Longest rendered page edge in pixels.
    #[arg(long, env = "PDF2QUIZ_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Characters of question text compared when deduplicating.
    #[arg(long, env = "PDF2QUIZ_DEDUP_CHARS", default_value_t = 120)]
    dedup_chars: usize,

    /// PDF user password for encrypted papers.
    #[arg(long, env = "PDF2QUIZ_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2QUIZ_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Print the pre-filter verdict for every paper and exit. No API calls.
    #[arg(long)]
    plan_only: bool,

    /// Print the batch result as JSON on stdout.
    #[arg(long, env = "PDF2QUIZ_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2QUIZ_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2QUIZ_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2QUIZ_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.plan_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let context = build_context(&cli).await?;

    // ── Plan-only mode ───────────────────────────────────────────────────
    if cli.plan_only {
        let plan = plan_directory(&cli.input, &context).context("Failed to scan input")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("Failed to serialise plan")?
            );
        } else {
            for entry in &plan {
                let mark = if entry.process { green("✓") } else { yellow("⊘") };
                println!(
                    "{} {:<48} {:<6} {}",
                    mark,
                    entry.document,
                    entry.detected_year.as_deref().unwrap_or("-"),
                    dim(&entry.reason)
                );
            }
            let accepted = plan.iter().filter(|p| p.process).count();
            println!("{accepted}/{} papers would be processed", plan.len());
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let observer: Option<ProgressObserver> = if show_progress {
        Some(CliObserver::new() as Arc<dyn ExtractionObserver>)
    } else {
        None
    };
    let config = build_config(&cli, context, observer).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let extractor = Extractor::from_config(config).context("Failed to initialise extractor")?;
    let paths = enumerate_documents(&cli.input).context("Failed to scan input")?;
    let batch = extractor.process_batch(paths).await;

    write_batch(&cli.output, &batch)
        .await
        .context("Failed to write output")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&batch).context("Failed to serialise output")?;
        println!("{json}");
    }

    if !cli.quiet {
        eprintln!(
            "{}  {} found  {} processed  {} skipped  {} failed  →  {} questions in {}ms  →  {}",
            if batch.success() { green("✔") } else { red("✘") },
            batch.files_found,
            batch.processed,
            batch.skipped,
            batch.failed,
            bold(&batch.total_questions.to_string()),
            batch.duration_ms,
            bold(&cli.output.display().to_string()),
        );
        for error in &batch.errors {
            eprintln!("   {}", dim(error));
        }
    }

    if !batch.success() {
        anyhow::bail!("No document in the batch was extracted successfully");
    }
    Ok(())
}

/// Load the context file (if any) and apply flag overrides.
async fn build_context(cli: &Cli) -> Result<ExtractionContext> {
    let mut context = if let Some(ref path) = cli.context {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read context file {:?}", path))?;
        ExtractionContext::from_json(&json).with_context(|| format!("Invalid context file {:?}", path))?
    } else {
        ExtractionContext::default()
    };

    if let Some(ref key) = cli.exam_key {
        context.exam_key = edgequake_pdf2quiz::CategoryKey::new([key]);
    }
    if let Some(ref name) = cli.full_name {
        context.full_name = name.clone();
    }
    if !cli.years.is_empty() {
        context = context
            .with_allowed_years(&cli.years)
            .context("Invalid --years")?;
    }
    if cli.strict {
        context.strict_filtering = true;
    }
    if cli.category_gate {
        context.category_gate = true;
    }
    Ok(context)
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(
    cli: &Cli,
    context: ExtractionContext,
    observer: Option<ProgressObserver>,
) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .context(context)
        .pages_per_chunk(cli.pages_per_chunk as usize)
        .max_retries_per_chunk(cli.max_retries)
        .retry_delay_ms(cli.retry_delay_ms)
        .call_delay_ms(cli.call_delay_ms)
        .document_delay_ms(cli.document_delay_ms)
        .unit_concurrency(cli.unit_concurrency)
        .document_concurrency(cli.document_concurrency)
        .api_timeout_secs(cli.api_timeout)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_rendered_pixels(cli.max_pixels)
        .dedup_prefix_chars(cli.dedup_chars);

    if let Some(obs) = observer {
        builder = builder.observer(obs);
    }

    let mut config = builder.build().context("Invalid configuration")?;

    // Fields that are only set when given
    config.model = cli.model.clone();
    config.provider_name = cli.provider.clone();
    config.password = cli.password.clone();
    config.system_prompt = system_prompt;

    Ok(config)
}
