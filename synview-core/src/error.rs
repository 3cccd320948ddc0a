use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("failed to load {path:?}: {reason}")]
    LoadFailure { path: PathBuf, reason: String },

    #[error("cleared all page renderings but {bytes} bytes are still accounted")]
    CacheAccountingMismatch { bytes: u64 },

    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("failed to render page {page}: {reason}")]
    Render { page: usize, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}
