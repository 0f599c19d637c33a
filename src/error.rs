//! Error types for the edgequake-pdf2quiz library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`]: **Fatal** for the scope it is raised in: a document
//!   that cannot be read or rasterised, a provider that is not configured, an
//!   output directory that cannot be written. Inside a batch it is recorded on
//!   that document's result and the other documents carry on.
//!
//! * [`UnitError`]: **Non-fatal**: one page-range unit failed (transport
//!   error, timeout, unparseable response) after its retries. Stored inside
//!   [`crate::output::DocumentResult::errors`] so partial extraction of the
//!   remaining units still counts.
//!
//! Filter skips are not errors at all; they are ordinary terminal states
//! carried in [`crate::output::DocumentMetadata::skipped_reason`].

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the edgequake-pdf2quiz library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input path was not found.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input root is a file but a directory was expected.
    #[error("Input root '{path}' is not a directory")]
    NotADirectory { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Reading the file failed for a reason other than permissions.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{document}' is corrupt: {detail}")]
    CorruptPdf { document: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{document}' is encrypted and requires a password.")]
    PasswordRequired { document: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{document}'")]
    WrongPassword { document: String },

    /// The document opened but has no pages to segment.
    #[error("PDF '{document}' has no extractable pages")]
    EmptyDocument { document: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The exam context could not be normalised.
    #[error("Invalid exam context: {0}")]
    InvalidContext(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single unit (page range).
///
/// The document continues with its other units; the message lands in the
/// document's error list.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// The extraction service could not be reached or rejected the call.
    #[error("extraction call failed after {retries} retries: {detail}")]
    Transport { retries: u32, detail: String },

    /// The call exceeded the per-call timeout on its final attempt.
    #[error("extraction call timed out after {secs}s ({retries} retries)")]
    Timeout { retries: u32, secs: u64 },

    /// The response never contained a usable JSON payload.
    #[error("unusable response after {retries} retries: {detail}")]
    Parse { retries: u32, detail: String },

    /// The unit's processing task panicked.
    #[error("unit processing panicked: {0}")]
    Panicked(String),
}
