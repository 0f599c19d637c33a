//! Segmentation: split a document into bounded page-range units.
//!
//! A unit is the atomic work item sent to the model. Its size is bounded by
//! `pages_per_chunk` so a single request stays inside the service's input
//! limits no matter how long the paper is.
//!
//! Planning ([`plan_units`]) is pure arithmetic over the page count; the
//! page images themselves come from a [`PageRenderer`], which in production
//! is [`PdfiumRenderer`] (pdfium rasterisation + PNG encoding).

use crate::error::ExtractError;
use crate::pipeline::input::Document;
use crate::pipeline::render;
use async_trait::async_trait;
use edgequake_llm::ImageData;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Inclusive, 1-based, document-absolute page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange {
    pub from_page: usize,
    pub to_page: usize,
}

impl PageRange {
    pub fn new(from_page: usize, to_page: usize) -> Self {
        debug_assert!(from_page >= 1 && from_page <= to_page);
        Self { from_page, to_page }
    }

    /// Number of pages in the range.
    pub fn len(&self) -> usize {
        self.to_page + 1 - self.from_page
    }

    pub fn contains(&self, page: usize) -> bool {
        page >= self.from_page && page <= self.to_page
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from_page, self.to_page)
    }
}

/// One page range of a document plus its encoded page images.
#[derive(Debug, Clone)]
pub struct Unit {
    /// Position of the unit within its document (0-based).
    pub index: usize,
    pub range: PageRange,
    /// One image per page, in page order.
    pub pages: Vec<ImageData>,
}

/// Partition `[1, total_pages]` into consecutive ranges of at most
/// `pages_per_chunk` pages. Only the last range may be shorter.
pub fn plan_units(total_pages: usize, pages_per_chunk: usize) -> Vec<PageRange> {
    let size = pages_per_chunk.max(1);
    (1..=total_pages)
        .step_by(size)
        .map(|from| PageRange::new(from, (from + size - 1).min(total_pages)))
        .collect()
}

/// Group rendered pages into units.
///
/// # Errors
/// [`ExtractError::EmptyDocument`] when there are no pages; callers must
/// never see an empty unit list for a document.
pub fn segment(
    document: &str,
    pages: Vec<ImageData>,
    pages_per_chunk: usize,
) -> Result<Vec<Unit>, ExtractError> {
    if pages.is_empty() {
        return Err(ExtractError::EmptyDocument {
            document: document.to_string(),
        });
    }

    let ranges = plan_units(pages.len(), pages_per_chunk);
    let mut pages = pages.into_iter();
    let units: Vec<Unit> = ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| Unit {
            index,
            range,
            pages: pages.by_ref().take(range.len()).collect(),
        })
        .collect();

    debug!(
        "{}: {} pages → {} units of ≤{}",
        document,
        units.last().map_or(0, |u| u.range.to_page),
        units.len(),
        pages_per_chunk.max(1)
    );
    Ok(units)
}

/// Source of page images for a document.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render every page of the document, in order.
    async fn render_pages(&self, document: &Document) -> Result<Vec<ImageData>, ExtractError>;
}

/// Production renderer: pdfium rasterisation followed by PNG encoding.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    pub max_rendered_pixels: u32,
    pub password: Option<String>,
}

impl PdfiumRenderer {
    pub fn new(max_rendered_pixels: u32, password: Option<String>) -> Self {
        Self {
            max_rendered_pixels,
            password,
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render_pages(&self, document: &Document) -> Result<Vec<ImageData>, ExtractError> {
        render::render_document(
            &document.id,
            document.bytes(),
            self.max_rendered_pixels,
            self.password.clone(),
        )
        .await
    }
}
