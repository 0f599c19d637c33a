//! Input resolution: enumerate PDFs under an input root and load them.
//!
//! Documents are read once, validated by their `%PDF` magic bytes, and then
//! shared immutably (`Arc`) with the rendering thread. Identifier-derived
//! metadata (candidate year) is computed here so the pre-filter and the
//! result metadata agree on it.

use crate::error::ExtractError;
use crate::pipeline::filter::detect_year;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One input file, read once and immutable thereafter.
#[derive(Debug, Clone)]
pub struct Document {
    /// File name used in logs, results and generated ids.
    pub id: String,
    pub path: PathBuf,
    /// Year guessed from the identifier, normalised to 4 digits.
    pub detected_year: Option<String>,
    bytes: Arc<Vec<u8>>,
}

impl Document {
    /// Build a document from bytes already in memory.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        let path = path.into();
        let id = document_id(&path);
        let detected_year = detect_year(&id);
        Self {
            id,
            path,
            detected_year,
            bytes: Arc::new(bytes),
        }
    }

    pub fn bytes(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.bytes)
    }

    /// File stem, used as the prefix of generated question ids.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// The identifier of a path: its file name, falling back to the full path.
pub fn document_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Check whether a path has a `.pdf` extension (case-insensitive).
pub fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Recursively list every PDF under `root`, sorted by path.
///
/// A single PDF file is accepted as a root of one document.
pub fn enumerate_documents(root: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    if !root.exists() {
        return Err(ExtractError::InputNotFound {
            path: root.to_path_buf(),
        });
    }
    if root.is_file() {
        return if is_pdf_path(root) {
            Ok(vec![root.to_path_buf()])
        } else {
            Err(ExtractError::NotADirectory {
                path: root.to_path_buf(),
            })
        };
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_pdf_path(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();

    info!("Found {} PDF files under {}", files.len(), root.display());
    Ok(files)
}

/// Read a local PDF, validating existence, permissions and magic bytes.
pub async fn load_document(path: &Path) -> Result<Document, ExtractError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExtractError::InputNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ExtractError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(ExtractError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }

    debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
    Ok(Document::from_bytes(path, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pdf_path() {
        assert!(is_pdf_path(Path::new("/tmp/paper.pdf")));
        assert!(is_pdf_path(Path::new("PAPER.PDF")));
        assert!(!is_pdf_path(Path::new("paper.pdf.txt")));
        assert!(!is_pdf_path(Path::new("paper")));
    }

    #[test]
    fn document_metadata_from_identifier() {
        let doc = Document::from_bytes("/data/neet/NEET_2023_paper.pdf", b"%PDF-1.7".to_vec());
        assert_eq!(doc.id, "NEET_2023_paper.pdf");
        assert_eq!(doc.stem(), "NEET_2023_paper");
        assert_eq!(doc.detected_year.as_deref(), Some("2023"));
    }

    #[test]
    fn enumerate_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2023").join("shift1");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF").unwrap();
        std::fs::write(nested.join("a.PDF"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let files = enumerate_documents(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("2023/shift1/a.PDF"));
        assert!(files[1].ends_with("b.pdf"));
    }

    #[test]
    fn enumerate_missing_root_fails() {
        let err = enumerate_documents(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ExtractError::InputNotFound { .. }));
    }

    #[tokio::test]
    async fn load_rejects_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"<html>not a pdf</html>").unwrap();
        let err = load_document(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::NotAPdf { .. }));
    }

    #[tokio::test]
    async fn load_reads_pdf_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jee_2024.pdf");
        std::fs::write(&path, b"%PDF-1.4 body").unwrap();
        let doc = load_document(&path).await.unwrap();
        assert_eq!(doc.bytes().len(), 13);
        assert_eq!(doc.detected_year.as_deref(), Some("2024"));
    }
}
