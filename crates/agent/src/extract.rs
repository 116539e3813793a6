//! Document text extraction.
//!
//! Only plain text and markdown are read in-process. Other formats are
//! reported as unsupported so the user can convert them first.

use async_trait::async_trait;
use localmind_core::error::ExtractionError;
use std::path::Path;
use tracing::debug;

/// Turns a file on disk into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<String, ExtractionError>;

    /// Whether `path` has an extension this extractor reads.
    fn supports(&self, path: &Path) -> bool;
}

/// Reads `.txt`, `.md` and `.markdown` files as lossy UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileExtractor;

impl FileExtractor {
    pub const EXTENSIONS: [&'static str; 3] = ["txt", "md", "markdown"];
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

#[async_trait]
impl TextExtractor for FileExtractor {
    async fn extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
        if !self.supports(path) {
            return Err(ExtractionError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: extension_of(path),
            });
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractionError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        debug!(path = %path.display(), bytes = bytes.len(), "Extracted text");
        Ok(text)
    }

    fn supports(&self, path: &Path) -> bool {
        Self::EXTENSIONS.contains(&extension_of(path).as_str())
    }
}
