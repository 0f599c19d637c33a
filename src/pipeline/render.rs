//! Page images: rasterise an in-memory PDF with pdfium and encode every
//! page as a base64 PNG attachment.
//!
//! pdfium is not async-safe and PNG encoding is CPU-bound, so a document is
//! rendered and encoded inside one `tokio::task::spawn_blocking` call. The
//! longest page edge is capped by `max_rendered_pixels`.
//!
//! PNG keeps printed text and formulae crisp; `detail: "high"` makes
//! GPT-4-class models tile the full page, which small option labels and
//! subscripts need.

use crate::error::ExtractError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info};

/// Rasterise and encode all pages of a PDF held in memory, in page order.
///
/// Any page that fails aborts the document: a missing page would shift every
/// later page number.
pub async fn render_document(
    document: &str,
    bytes: Arc<Vec<u8>>,
    max_pixels: u32,
    password: Option<String>,
) -> Result<Vec<ImageData>, ExtractError> {
    let name = document.to_string();

    tokio::task::spawn_blocking(move || {
        render_document_blocking(&name, &bytes, max_pixels, password.as_deref())
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?
}

fn render_document_blocking(
    document: &str,
    bytes: &[u8],
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<ImageData>, ExtractError> {
    let pdfium = Pdfium::default();

    let pdf = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| classify_load_error(document, password.is_some(), format!("{:?}", e)))?;

    let pages = pdf.pages();
    let total_pages = pages.len() as usize;
    info!("{}: PDF loaded, {} pages", document, total_pages);

    if total_pages == 0 {
        return Err(ExtractError::EmptyDocument {
            document: document.to_string(),
        });
    }

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let page = pages
            .get(idx as u16)
            .map_err(|e| ExtractError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ExtractError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        let encoded = encode_page(&image).map_err(|e| ExtractError::RasterisationFailed {
            page: idx + 1,
            detail: format!("Image encoding failed: {e}"),
        })?;
        debug!(
            "{}: page {} → {}x{} px, {} bytes base64",
            document,
            idx + 1,
            image.width(),
            image.height(),
            encoded.data.len()
        );
        images.push(encoded);
    }

    Ok(images)
}

/// Encode one rasterised page as a high-detail base64 PNG.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
    Ok(ImageData::new(STANDARD.encode(&png), "image/png").with_detail("high"))
}

/// Map a pdfium load failure onto the password / corruption variants.
fn classify_load_error(document: &str, had_password: bool, detail: String) -> ExtractError {
    if detail.to_ascii_lowercase().contains("password") {
        if had_password {
            ExtractError::WrongPassword {
                document: document.to_string(),
            }
        } else {
            ExtractError::PasswordRequired {
                document: document.to_string(),
            }
        }
    } else {
        ExtractError::CorruptPdf {
            document: document.to_string(),
            detail,
        }
    }
}
